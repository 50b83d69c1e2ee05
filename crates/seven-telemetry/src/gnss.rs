use std::time::Duration;

use anyhow::{Context, Result};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::store::{Fix, TelemetryStore};

pub const KNOTS_TO_MPS: f64 = 0.514444;
/// Range error per unit of HDOP, turns HDOP into an accuracy radius.
pub const UERE_M: f64 = 5.0;
const NO_HDOP: f64 = 99.9;

/// NMEA sentences are at most 82 bytes; anything much longer is noise.
const MAX_LINE: usize = 512;
/// How long a replayed log is left alone before checking it for new lines.
const REPLAY_POLL: Duration = Duration::from_millis(500);
/// Read errors tolerated in a row before the feed gives up.
const MAX_READ_ERRORS: u32 = 5;
const READ_RETRY: Duration = Duration::from_secs(1);

enum Input {
    Serial(BufReader<SerialStream>),
    /// A log that may still be growing: EOF means "not yet".
    Replay(BufReader<File>),
}

/// NMEA 0183 receiver on a serial port, or a recorded log replayed from file.
pub struct GnssSource {
    input: Input,
    pending: Vec<u8>,
    parser: NmeaParser,
}

impl GnssSource {
    pub fn serial(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open serial {}", dev))?;
        Ok(Self::with_input(Input::Serial(BufReader::new(port))))
    }

    pub fn file(path: &str) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("open nmea file {}", path))?;
        Ok(Self::with_input(Input::Replay(BufReader::new(File::from_std(f)))))
    }

    fn with_input(input: Input) -> Self {
        Self { input, pending: Vec::with_capacity(96), parser: NmeaParser::default() }
    }

    /// Waits for the next sentence that completes a fix. Lines that are not
    /// UTF-8, overlong or unparseable are skipped.
    pub async fn next_fix(&mut self) -> Result<Fix> {
        loop {
            let n = match &mut self.input {
                Input::Serial(r) => r.read_until(b'\n', &mut self.pending).await.context("read nmea serial")?,
                Input::Replay(r) => r.read_until(b'\n', &mut self.pending).await.context("read nmea file")?,
            };

            if !self.pending.ends_with(b"\n") {
                match self.input {
                    Input::Serial(_) if n == 0 => anyhow::bail!("nmea serial closed"),
                    Input::Serial(_) => continue,
                    // keep the partial line until the writer finishes it
                    Input::Replay(_) => {
                        if self.pending.len() > MAX_LINE {
                            self.pending.clear();
                        }
                        tokio::time::sleep(REPLAY_POLL).await;
                        continue;
                    }
                }
            }

            let line = std::mem::take(&mut self.pending);
            if line.len() > MAX_LINE {
                debug!("gnss: dropping {}-byte line", line.len());
                continue;
            }
            let Ok(sentence) = std::str::from_utf8(&line) else {
                debug!("gnss: dropping non-utf8 line ({} bytes)", line.len());
                continue;
            };
            if let Some(fix) = self.parser.feed(sentence.trim()) {
                return Ok(fix);
            }
        }
    }
}

/// Pushes every fix from `src` into `store` until `stop` flips to true.
///
/// Read errors are retried; the feed only fails after several in a row.
pub async fn feed(mut src: GnssSource, store: TelemetryStore, mut stop: watch::Receiver<bool>) -> Result<()> {
    info!("gnss: feed started");
    let mut errors = 0;
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("gnss: feed stopped");
                    return Ok(());
                }
            }
            fix = src.next_fix() => match fix {
                Ok(fix) => {
                    errors = 0;
                    debug!("gnss: fix t={} v={:.2}m/s alt={:.1}m acc={:.1}m",
                        fix.timestamp_ms, fix.speed_mps, fix.altitude_m, fix.accuracy_m);
                    store.on_fix(&fix);
                }
                Err(e) => {
                    errors += 1;
                    if errors >= MAX_READ_ERRORS {
                        return Err(e.context(format!("gnss: {} read errors in a row", errors)));
                    }
                    warn!("gnss: {:#}, retrying", e);
                    tokio::time::sleep(READ_RETRY).await;
                }
            }
        }
    }
}

/// Sentence-level NMEA state.
///
/// GGA carries altitude and HDOP, RMC carries time, date and speed. A fix
/// is emitted per valid RMC using the most recent GGA values.
#[derive(Debug, Default)]
pub struct NmeaParser {
    altitude_m: f64,
    hdop: Option<f64>,
}

impl NmeaParser {
    pub fn feed(&mut self, sentence: &str) -> Option<Fix> {
        // fields are sliced by byte offset below
        if !sentence.is_ascii() {
            return None;
        }
        let body = match strip_checksum(sentence) {
            Some(b) => b,
            None => {
                warn!("gnss: bad checksum: {}", sentence);
                return None;
            }
        };
        let parts: Vec<&str> = body.split(',').collect();
        let talker_msg = parts.first()?;
        if talker_msg.len() < 6 || !talker_msg.starts_with('$') {
            return None;
        }
        match &talker_msg[3..] {
            "GGA" => {
                self.on_gga(&parts);
                None
            }
            "RMC" => self.on_rmc(&parts),
            _ => None,
        }
    }

    fn on_gga(&mut self, parts: &[&str]) {
        if parts.len() <= 9 {
            return;
        }
        // quality 0 = no fix
        if parts[6].parse::<u8>().unwrap_or(0) == 0 {
            return;
        }
        self.hdop = parts[8].parse().ok();
        if let Ok(alt) = parts[9].parse() {
            self.altitude_m = alt;
        }
    }

    fn on_rmc(&mut self, parts: &[&str]) -> Option<Fix> {
        if parts.len() <= 9 || parts[2] != "A" {
            return None;
        }
        let knots: f64 = parts[7].parse().unwrap_or(0.0);
        let timestamp_ms = parse_utc(parts[1], parts[9])
            .unwrap_or_else(OffsetDateTime::now_utc)
            .unix_timestamp_nanos()
            / 1_000_000;
        Some(Fix {
            timestamp_ms: timestamp_ms as i64,
            speed_mps: knots * KNOTS_TO_MPS,
            altitude_m: self.altitude_m,
            accuracy_m: self.hdop.unwrap_or(NO_HDOP) * UERE_M,
        })
    }
}

/// `$...*hh` → the part between `$` and `*` (keeping `$`), if the XOR
/// checksum matches. Sentences without a checksum pass through.
fn strip_checksum(s: &str) -> Option<&str> {
    let Some((body, sum)) = s.rsplit_once('*') else {
        return Some(s);
    };
    let want = u8::from_str_radix(sum.trim(), 16).ok()?;
    let got = body.bytes().skip(1).fold(0u8, |acc, b| acc ^ b);
    (want == got).then_some(body)
}

/// hhmmss[.sss] + ddmmyy
fn parse_utc(hms: &str, dmy: &str) -> Option<OffsetDateTime> {
    if hms.len() < 6 || dmy.len() != 6 {
        return None;
    }
    let hour: u8 = hms[0..2].parse().ok()?;
    let minute: u8 = hms[2..4].parse().ok()?;
    let second: u8 = hms[4..6].parse().ok()?;
    let millis: u16 = match hms.get(6..) {
        Some(frac) if frac.starts_with('.') && frac.len() > 1 => {
            let digits = &frac[1..frac.len().min(4)];
            let v: u16 = digits.parse().ok()?;
            v * 10u16.pow(3 - digits.len() as u32)
        }
        _ => 0,
    };
    let day: u8 = dmy[0..2].parse().ok()?;
    let month: u8 = dmy[2..4].parse().ok()?;
    let year: i32 = 2000 + dmy[4..6].parse::<i32>().ok()?;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms_milli(hour, minute, second, millis).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().skip(1).fold(0u8, |acc, b| acc ^ b);
        format!("{}*{:02X}", body, sum)
    }

    const GGA: &str = "$GPGGA,123519.00,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
    const RMC: &str = "$GPRMC,123520.50,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";

    #[test]
    fn rmc_after_gga_makes_a_fix() {
        let mut p = NmeaParser::default();
        assert!(p.feed(&with_checksum(GGA)).is_none());
        let fix = p.feed(&with_checksum(RMC)).unwrap();

        let expected = time::macros::datetime!(1994-03-23 12:35:20.5 UTC);
        assert_eq!(fix.timestamp_ms as i128, expected.unix_timestamp_nanos() / 1_000_000);
        assert!((fix.speed_mps - 22.4 * KNOTS_TO_MPS).abs() < 1e-9);
        assert_eq!(fix.altitude_m, 545.4);
        assert!((fix.accuracy_m - 0.9 * UERE_M).abs() < 1e-9);
    }

    #[test]
    fn void_rmc_and_bad_checksum_are_skipped() {
        let mut p = NmeaParser::default();
        let void = RMC.replace(",A,", ",V,");
        assert!(p.feed(&with_checksum(&void)).is_none());
        assert!(p.feed(&format!("{}*00", RMC)).is_none());
        assert!(p.feed("$GPGSV,3,1,11,03,03,111,00").is_none());
        assert!(p.feed("").is_none());
    }

    #[test]
    fn gn_talker_and_missing_gga() {
        let mut p = NmeaParser::default();
        let fix = p.feed(&RMC.replace("$GPRMC", "$GNRMC")).unwrap();
        assert_eq!(fix.altitude_m, 0.0);
        assert!((fix.accuracy_m - NO_HDOP * UERE_M).abs() < 1e-9);
    }

    #[test]
    fn non_ascii_sentences_are_skipped() {
        let mut p = NmeaParser::default();
        assert!(p.feed("$G\u{e9}RMC,1").is_none());
        assert!(p.feed("$\u{e9}").is_none());
        let garbled = RMC.replace("230394", "23\u{e9}394");
        assert!(p.feed(&garbled).is_none());
        assert!(p.feed(RMC).is_some());
    }

    fn temp_log(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("seven-{}-{}.log", name, std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn line_noise_in_log_is_skipped() {
        let mut bytes = vec![0xFF, 0xFE, b'\n'];
        bytes.extend_from_slice(b"$GP\xC3(RMC,garbage\r\n");
        bytes.extend(std::iter::repeat(b'x').take(MAX_LINE + 10));
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(with_checksum(RMC).as_bytes());
        bytes.extend_from_slice(b"\r\n");
        let path = temp_log("noise", &bytes);

        let mut src = GnssSource::file(path.to_str().unwrap()).unwrap();
        let fix = tokio::time::timeout(std::time::Duration::from_secs(5), src.next_fix())
            .await
            .expect("valid sentence never reached")
            .unwrap();
        assert!((fix.speed_mps - 22.4 * KNOTS_TO_MPS).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn partial_line_waits_for_the_rest() {
        let sentence = with_checksum(RMC);
        let (head, tail) = sentence.split_at(20);
        let path = temp_log("partial", head.as_bytes());

        let mut src = GnssSource::file(path.to_str().unwrap()).unwrap();
        let next = tokio::spawn(async move { src.next_fix().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!next.is_finished());

        let mut log = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut log, format!("{}\r\n", tail).as_bytes()).unwrap();
        let fix = tokio::time::timeout(std::time::Duration::from_secs(5), next)
            .await
            .expect("completed line not picked up")
            .unwrap()
            .unwrap();
        assert!((fix.speed_mps - 22.4 * KNOTS_TO_MPS).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn replays_file_into_store() {
        let path = std::env::temp_dir().join(format!("seven-nmea-{}.log", std::process::id()));
        let log = [
            with_checksum(GGA),
            with_checksum("$GPRMC,120000.00,A,4807.038,N,01131.000,E,019.4,084.4,010624,,"),
            with_checksum("$GPRMC,120001.00,A,4807.038,N,01131.000,E,019.4,084.4,010624,,"),
        ]
        .join("\r\n");
        std::fs::write(&path, log + "\r\n").unwrap();

        let mut src = GnssSource::file(path.to_str().unwrap()).unwrap();
        let store = TelemetryStore::new();
        for _ in 0..2 {
            store.on_fix(&src.next_fix().await.unwrap());
        }
        let s = store.snapshot();
        // 19.4 kn ≈ 22.33 mph for one second
        assert!((s.speed_mph - 22.33).abs() < 0.01, "{}", s.speed_mph);
        assert!((s.distance_miles - s.speed_mph / 3600.0).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }
}
