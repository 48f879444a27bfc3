//! European Data Format (EDF/EDF+) recordings.
//!
//! The file is a 256-byte fixed header, 256 bytes of per-signal header for
//! each signal, then data records holding `samples_per_record` little-endian
//! `i16` values per signal. Digital values map linearly onto the physical
//! range declared in the signal header.

use super::{ChannelData, ChannelInfo, RawStartTime, Recording, RecordingReader};
use crate::error::InputError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use tracing::{debug, info};

const FIXED_HEADER_LEN: usize = 256;
const SIGNAL_HEADER_LEN: usize = 256;

/// Widths of the per-signal header fields, in file order.
const SIGNAL_FIELD_WIDTHS: [usize; 10] = [16, 80, 8, 8, 8, 8, 8, 80, 8, 32];

/// Label of the EDF+ annotation pseudo-channel.
const ANNOTATIONS_LABEL: &str = "EDF Annotations";

const DIGITAL_MIN: i32 = -32768;
const DIGITAL_MAX: i32 = 32767;

#[derive(Debug, Clone)]
struct SignalHeader {
    label: String,
    unit: String,
    physical_min: f64,
    physical_max: f64,
    digital_min: i32,
    digital_max: i32,
    samples_per_record: usize,
}

impl SignalHeader {
    fn sample_rate(&self, record_duration: f64) -> f64 {
        self.samples_per_record as f64 / record_duration
    }

    fn to_physical(&self, digital: i16) -> f64 {
        let gain = (self.physical_max - self.physical_min)
            / f64::from(self.digital_max - self.digital_min);
        self.physical_min + (f64::from(digital) - f64::from(self.digital_min)) * gain
    }

    fn is_annotations(&self) -> bool {
        self.label == ANNOTATIONS_LABEL
    }
}

#[derive(Debug, Clone)]
struct Header {
    start: NaiveDateTime,
    header_len: usize,
    /// `None` when the file declares -1 (still being written)
    record_count: Option<usize>,
    record_duration: f64,
    /// Bytes per data record across all signals
    record_len: usize,
    signals: Vec<SignalHeader>,
}

fn malformed(path: &Path, reason: impl Into<String>) -> InputError {
    InputError::Malformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_error(path: &Path, err: io::Error, what: &str) -> InputError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => malformed(path, format!("truncated {what}")),
        io::ErrorKind::NotFound => InputError::Missing(path.to_path_buf()),
        _ => InputError::Unreadable {
            path: path.to_path_buf(),
            source: err,
        },
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn number<T: std::str::FromStr>(bytes: &[u8], field: &str, path: &Path) -> Result<T, InputError> {
    let raw = text(bytes);
    raw.parse()
        .map_err(|_| malformed(path, format!("{field} '{raw}' is not a number")))
}

/// Parse `dd.mm.yy` and `hh.mm.ss`; two-digit years 85-99 are 19xx.
fn parse_start(date: &str, time: &str, path: &Path) -> Result<NaiveDateTime, InputError> {
    let parts = |s: &str, what: &str| -> Result<[u32; 3], InputError> {
        let fields: Vec<u32> = s
            .split('.')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed(path, format!("start {what} '{s}'")))?;
        <[u32; 3]>::try_from(fields).map_err(|_| malformed(path, format!("start {what} '{s}'")))
    };
    let [day, month, yy] = parts(date, "date")?;
    let [hour, minute, second] = parts(time, "time")?;
    let year = if yy >= 85 { 1900 + yy } else { 2000 + yy };

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| malformed(path, format!("start '{date} {time}' is not a valid date")))
}

/// Parse the fixed and per-signal headers of a file `file_len` bytes long.
fn read_header<R: Read>(reader: &mut R, path: &Path, file_len: u64) -> Result<Header, InputError> {
    let mut fixed = [0u8; FIXED_HEADER_LEN];
    reader
        .read_exact(&mut fixed)
        .map_err(|e| read_error(path, e, "header"))?;

    let start = parse_start(&text(&fixed[168..176]), &text(&fixed[176..184]), path)?;
    let header_len: usize = number(&fixed[184..192], "header size", path)?;
    let record_count: i64 = number(&fixed[236..244], "record count", path)?;
    let record_duration: f64 = number(&fixed[244..252], "record duration", path)?;
    let signal_count: usize = number(&fixed[252..256], "signal count", path)?;

    let declared = signal_count
        .checked_mul(SIGNAL_HEADER_LEN)
        .and_then(|n| n.checked_add(FIXED_HEADER_LEN));
    if declared != Some(header_len) {
        return Err(malformed(
            path,
            format!("header size {header_len} does not match {signal_count} signals"),
        ));
    }
    if header_len as u64 > file_len {
        return Err(malformed(
            path,
            format!("truncated signal header ({file_len} of {header_len} bytes)"),
        ));
    }
    if !(record_duration.is_finite() && record_duration > 0.0) {
        return Err(malformed(path, format!("record duration {record_duration}")));
    }

    let mut raw = vec![0u8; signal_count * SIGNAL_HEADER_LEN];
    reader
        .read_exact(&mut raw)
        .map_err(|e| read_error(path, e, "signal header"))?;

    // Each field is stored for all signals before the next field starts
    let mut fields: Vec<Vec<&[u8]>> = Vec::with_capacity(SIGNAL_FIELD_WIDTHS.len());
    let mut offset = 0;
    for width in SIGNAL_FIELD_WIDTHS {
        let block = &raw[offset..offset + width * signal_count];
        fields.push(block.chunks(width).collect());
        offset += width * signal_count;
    }

    let mut signals = Vec::with_capacity(signal_count);
    for i in 0..signal_count {
        let signal = SignalHeader {
            label: text(fields[0][i]),
            unit: text(fields[2][i]),
            physical_min: number(fields[3][i], "physical minimum", path)?,
            physical_max: number(fields[4][i], "physical maximum", path)?,
            digital_min: number(fields[5][i], "digital minimum", path)?,
            digital_max: number(fields[6][i], "digital maximum", path)?,
            samples_per_record: number(fields[8][i], "samples per record", path)?,
        };
        if signal.digital_max <= signal.digital_min {
            return Err(malformed(
                path,
                format!("signal '{}' has an empty digital range", signal.label),
            ));
        }
        signals.push(signal);
    }

    let record_len = signals
        .iter()
        .try_fold(0usize, |acc, s| {
            s.samples_per_record.checked_mul(2).and_then(|n| acc.checked_add(n))
        })
        .ok_or_else(|| malformed(path, "samples per record overflow the record size"))?;

    Ok(Header {
        start,
        header_len,
        record_count: usize::try_from(record_count).ok(),
        record_duration,
        record_len,
        signals,
    })
}

/// Fill `buf` as far as the reader allows; returns the bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Records the data section can hold, checked against the declared count.
fn checked_record_count(header: &Header, file_len: u64, path: &Path) -> Result<usize, InputError> {
    let data_len = file_len.saturating_sub(header.header_len as u64);
    let record_len = header.record_len as u64;
    let Some(count) = header.record_count else {
        return Ok(data_len.checked_div(record_len).unwrap_or(0) as usize);
    };
    let needed = (count as u64)
        .checked_mul(record_len)
        .ok_or_else(|| malformed(path, format!("{count} records of {record_len} bytes overflow")))?;
    if needed > data_len {
        return Err(malformed(
            path,
            format!(
                "header declares {count} records of {record_len} bytes \
                 but the file holds {data_len} data bytes"
            ),
        ));
    }
    Ok(count)
}

fn read_recording<R: Read>(
    mut reader: R,
    path: &Path,
    channels: &[&str],
    file_len: u64,
) -> Result<Recording, InputError> {
    let header = read_header(&mut reader, path, file_len)?;
    let expected_records = checked_record_count(&header, file_len, path)?;

    // (signal index, byte offset within a record) for every requested channel
    let mut selected = Vec::with_capacity(channels.len());
    for &name in channels {
        let index = header
            .signals
            .iter()
            .position(|s| s.label == name && !s.is_annotations())
            .ok_or_else(|| InputError::ChannelNotFound {
                channel: name.to_string(),
                available: header
                    .signals
                    .iter()
                    .filter(|s| !s.is_annotations())
                    .map(|s| s.label.clone())
                    .collect(),
            })?;
        let offset = header.signals[..index]
            .iter()
            .map(|s| s.samples_per_record * 2)
            .sum::<usize>();
        selected.push((index, offset));
    }

    let record_len = header.record_len;
    let mut record = vec![0u8; record_len];
    let mut samples: Vec<Vec<f64>> = selected
        .iter()
        .map(|&(i, _)| {
            Vec::with_capacity(header.signals[i].samples_per_record * expected_records)
        })
        .collect();

    let mut records_read = 0;
    while header.record_count.map_or(true, |count| records_read < count) {
        let n = read_up_to(&mut reader, &mut record)
            .map_err(|e| read_error(path, e, "data record"))?;
        if n == 0 && header.record_count.is_none() {
            break;
        }
        if n < record_len {
            return Err(malformed(
                path,
                format!("data record {records_read} truncated ({n} of {record_len} bytes)"),
            ));
        }

        for (out, &(index, offset)) in samples.iter_mut().zip(&selected) {
            let signal = &header.signals[index];
            let bytes = &record[offset..offset + signal.samples_per_record * 2];
            out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| signal.to_physical(i16::from_le_bytes([b[0], b[1]]))),
            );
        }
        records_read += 1;
    }

    debug!(
        path = %path.display(),
        records = records_read,
        channels = selected.len(),
        "Read EDF data records"
    );

    let channels = selected
        .iter()
        .zip(samples)
        .map(|(&(index, _), samples)| {
            let signal = &header.signals[index];
            ChannelData {
                name: signal.label.clone(),
                sample_rate: signal.sample_rate(header.record_duration),
                unit: signal.unit.clone(),
                samples,
            }
        })
        .collect();

    Ok(Recording {
        channels,
        start: RawStartTime::Naive(header.start),
    })
}

/// Reader for EDF and EDF+ files.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdfReader;

impl EdfReader {
    pub fn new() -> Self {
        Self
    }
}

impl RecordingReader for EdfReader {
    fn read(
        &self,
        path: &Path,
        channels: &[&str],
        preload: bool,
    ) -> Result<Recording, InputError> {
        if !path.exists() {
            return Err(InputError::Missing(path.to_path_buf()));
        }
        info!(path = %path.display(), ?channels, preload, "Reading recording");

        if preload {
            let bytes = fs::read(path).map_err(|e| read_error(path, e, "file"))?;
            let file_len = bytes.len() as u64;
            read_recording(Cursor::new(bytes), path, channels, file_len)
        } else {
            let file = File::open(path).map_err(|e| read_error(path, e, "file"))?;
            let file_len = file
                .metadata()
                .map_err(|e| read_error(path, e, "file"))?
                .len();
            read_recording(BufReader::new(file), path, channels, file_len)
        }
    }

    fn list_channels(&self, path: &Path) -> Result<Vec<ChannelInfo>, InputError> {
        let file = File::open(path).map_err(|e| read_error(path, e, "file"))?;
        let file_len = file
            .metadata()
            .map_err(|e| read_error(path, e, "file"))?
            .len();
        let header = read_header(&mut BufReader::new(file), path, file_len)?;
        let record_count = checked_record_count(&header, file_len, path)?;

        Ok(header
            .signals
            .iter()
            .filter(|s| !s.is_annotations())
            .map(|s| ChannelInfo {
                name: s.label.clone(),
                sample_rate: s.sample_rate(header.record_duration),
                unit: s.unit.clone(),
                sample_count: s.samples_per_record.saturating_mul(record_count),
            })
            .collect())
    }
}

/// A channel to be written by [`write_edf`].
#[derive(Debug, Clone, Copy)]
pub struct EdfSignal<'a> {
    pub label: &'a str,
    pub unit: &'a str,
    /// Must give a whole number of samples per record
    pub sample_rate: f64,
    pub samples: &'a [f64],
}

/// Shortest decimal rendering of `value` in 8 characters, rounded with `round`.
fn fit_field(value: f64, round: fn(f64) -> f64) -> (String, f64) {
    for precision in (0..=6).rev() {
        let scale = 10f64.powi(precision);
        let rounded = round(value * scale) / scale;
        let s = format!("{rounded:.prec$}", prec = precision as usize);
        if s.len() <= 8 {
            return (s, rounded);
        }
    }
    let rounded = round(value);
    (format!("{rounded:.0}"), rounded)
}

fn put(buf: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    buf.extend_from_slice(&bytes[..n]);
    buf.extend(std::iter::repeat(b' ').take(width - n));
}

/// Write `signals` as an EDF file starting at `start`.
///
/// Each signal's physical range is taken from its samples. Only complete
/// records are written; trailing samples that do not fill one are dropped.
pub fn write_edf(
    path: &Path,
    start: NaiveDateTime,
    record_duration_secs: u32,
    signals: &[EdfSignal<'_>],
) -> io::Result<()> {
    let duration = f64::from(record_duration_secs.max(1));
    let per_record: Vec<usize> = signals
        .iter()
        .map(|s| (s.sample_rate * duration).round() as usize)
        .collect();
    let record_count = signals
        .iter()
        .zip(&per_record)
        .map(|(s, &n)| if n == 0 { 0 } else { s.samples.len() / n })
        .min()
        .unwrap_or(0);

    let ranges: Vec<((String, f64), (String, f64))> = signals
        .iter()
        .map(|s| {
            let lo = s.samples.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = s.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let (lo, hi) = if lo.is_finite() && hi > lo { (lo, hi) } else { (-1.0, 1.0) };
            (fit_field(lo, f64::floor), fit_field(hi, f64::ceil))
        })
        .collect();

    let mut header = Vec::with_capacity(FIXED_HEADER_LEN * (signals.len() + 1));
    put(&mut header, "0", 8);
    put(&mut header, "X X X X", 80);
    put(&mut header, "Startdate X X X X", 80);
    put(
        &mut header,
        &format!("{:02}.{:02}.{:02}", start.day(), start.month(), start.year() % 100),
        8,
    );
    put(
        &mut header,
        &format!("{:02}.{:02}.{:02}", start.hour(), start.minute(), start.second()),
        8,
    );
    put(&mut header, &(FIXED_HEADER_LEN * (signals.len() + 1)).to_string(), 8);
    put(&mut header, "", 44);
    put(&mut header, &record_count.to_string(), 8);
    put(&mut header, &record_duration_secs.max(1).to_string(), 8);
    put(&mut header, &signals.len().to_string(), 4);

    for s in signals {
        put(&mut header, s.label, 16);
    }
    for _ in signals {
        put(&mut header, "", 80);
    }
    for s in signals {
        put(&mut header, s.unit, 8);
    }
    for ((lo, _), _) in &ranges {
        put(&mut header, lo, 8);
    }
    for (_, (hi, _)) in &ranges {
        put(&mut header, hi, 8);
    }
    for _ in signals {
        put(&mut header, &DIGITAL_MIN.to_string(), 8);
    }
    for _ in signals {
        put(&mut header, &DIGITAL_MAX.to_string(), 8);
    }
    for _ in signals {
        put(&mut header, "", 80);
    }
    for n in &per_record {
        put(&mut header, &n.to_string(), 8);
    }
    for _ in signals {
        put(&mut header, "", 32);
    }

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header)?;

    let digital_span = f64::from(DIGITAL_MAX - DIGITAL_MIN);
    for record in 0..record_count {
        for ((s, &n), ((_, lo), (_, hi))) in signals.iter().zip(&per_record).zip(&ranges) {
            for &value in &s.samples[record * n..(record + 1) * n] {
                let digital = ((value - lo) / (hi - lo) * digital_span + f64::from(DIGITAL_MIN))
                    .round()
                    .clamp(f64::from(DIGITAL_MIN), f64::from(DIGITAL_MAX))
                    as i16;
                out.write_all(&digital.to_le_bytes())?;
            }
        }
    }
    out.flush()
}
