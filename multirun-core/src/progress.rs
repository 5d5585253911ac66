//! Tracking simulation progress from the captured process output.
//!
//! Simulations periodically print lines such as:
//!
//! ```text
//! Trace ETA 7.2 [min] % 2 12 22 32 42
//! Trace ETA 53 [s] % 20 30 40 50 60 70 80 90
//! ```
//!
//! where the last number is the percentage done so far. Later percentage
//! updates may also come on their own, as a bare number followed by a space.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

/// Latest known progress of a single running job.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    /// Percentage of the simulation done
    pub percent: u8,
    /// Estimated total run time as reported by the simulation
    pub eta: Option<Duration>,
}

impl Progress {
    /// Updates progress based on a single line of output, returns whether
    /// the line was recognized.
    pub fn update_from_line(&mut self, line: &str) -> bool {
        if let Some((eta, percent)) = parse_eta_line(line) {
            self.eta = Some(eta);
            self.percent = percent;
            return true;
        }
        if let Some(percent) = parse_percent_line(line) {
            self.percent = percent;
            return true;
        }
        false
    }
}

fn parse_eta_line(line: &str) -> Option<(Duration, u8)> {
    let rest = line.trim_end().strip_prefix("Trace ETA ")?;
    let mut words = rest.split_whitespace();
    let time: f64 = words.next()?.parse().ok()?;
    let unit = words.next()?;
    let multiplier = match unit {
        "[s]" => 1.0,
        "[min]" => 60.0,
        "[h]" => 3600.0,
        _ => return None,
    };
    if words.next()? != "%" {
        return None;
    }
    let percent = parse_percent(words.last()?)?;
    if !time.is_finite() || time < 0.0 {
        return None;
    }
    Some((Duration::from_secs_f64(time * multiplier), percent))
}

fn parse_percent_line(line: &str) -> Option<u8> {
    // trailing space is part of the format
    let number = line.strip_suffix(' ')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    parse_percent(number)
}

fn parse_percent(s: &str) -> Option<u8> {
    s.parse::<u8>().ok().filter(|p| *p <= 100)
}

/// Incremental reader for a growing log file.
///
/// Each call to [`read_lines`] returns only the complete lines written
/// since the previous call. Both `\n` and `\r` count as line breaks, since
/// progress is often printed by rewriting the same terminal line.
///
/// [`read_lines`]: #method.read_lines
/// Longest line kept by [`LogTail`], bytes past it are dropped until the
/// next line break.
///
/// [`LogTail`]: struct.LogTail.html
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTail {
    pub fn new(path: PathBuf) -> Self {
        LogTail {
            path,
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        let n = file.read_to_end(&mut buf)?;
        self.offset += n as u64;

        let mut lines = Vec::new();
        for byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !self.partial.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.partial).to_string());
                    self.partial.clear();
                }
            } else if self.partial.len() < MAX_LINE_LEN {
                self.partial.push(byte);
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn eta_line_in_minutes() {
        let mut progress = Progress::default();
        assert!(progress.update_from_line("Trace ETA 7.2 [min] % 2 12 22 32 42"));
        assert_eq!(progress.percent, 42);
        assert_eq!(progress.eta, Some(Duration::from_secs(432)));
    }

    #[test]
    fn eta_line_in_hours_with_single_percentage() {
        let mut progress = Progress::default();
        assert!(progress.update_from_line("Trace ETA 1.5 [h] % 0"));
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.eta, Some(Duration::from_secs(5400)));
    }

    #[test]
    fn bare_percentage_keeps_eta() {
        let mut progress = Progress::default();
        progress.update_from_line("Trace ETA 53 [s] % 20 30");
        assert!(progress.update_from_line("60 "));
        assert_eq!(progress.percent, 60);
        assert_eq!(progress.eta, Some(Duration::from_secs(53)));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let mut progress = Progress::default();
        assert!(!progress.update_from_line("Detector: mon_I=1.2 mon_ERR=0.1"));
        assert!(!progress.update_from_line("60"));
        assert!(!progress.update_from_line("Trace ETA soon [s] % 10"));
        assert_eq!(progress, Progress::default());
    }

    #[test]
    fn tail_returns_only_new_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut file = File::create(&path).unwrap();
        let mut tail = LogTail::new(path);

        file.write_all(b"first\nsec").unwrap();
        assert_eq!(tail.read_lines().unwrap(), vec!["first"]);
        file.write_all(b"ond\r10 \r").unwrap();
        assert_eq!(tail.read_lines().unwrap(), vec!["second", "10 "]);
        assert!(tail.read_lines().unwrap().is_empty());
    }

    #[test]
    fn overlong_line_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut file = File::create(&path).unwrap();
        let mut tail = LogTail::new(path);

        let long = vec![b'x'; MAX_LINE_LEN * 3];
        file.write_all(&long).unwrap();
        assert!(tail.read_lines().unwrap().is_empty());
        file.write_all(&long).unwrap();
        assert!(tail.read_lines().unwrap().is_empty());
        file.write_all(b"
42 
").unwrap();
        let lines = tail.read_lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
        assert_eq!(lines[1], "42 ");
    }
}
