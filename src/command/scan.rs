//! Response template matching: literal prefixes plus typed capture slots.
//!
//! A capture whose field is absent is a format mismatch
//! ([`Error::InvalidResponse`]), distinct from an exchange timeout. Captures
//! into bounded strings are validated against the destination capacity
//! before anything is written.

use heapless::String;

use super::RespLine;
use crate::error::Error;

/// Find the first response line starting with `prefix`. Interleaved
/// unsolicited lines are simply skipped.
pub fn find_line<'a>(lines: &'a [RespLine], prefix: &str) -> Result<&'a str, Error> {
    lines
        .iter()
        .map(|l| l.as_str())
        .find(|l| l.starts_with(prefix))
        .ok_or(Error::InvalidResponse)
}

/// Cursor over a single response line.
pub struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    pub fn new(line: &'a str) -> Self {
        Scanner { rest: line }
    }

    /// Match a literal token at the cursor.
    pub fn literal(&mut self, lit: &str) -> Result<(), Error> {
        self.rest = self.rest.strip_prefix(lit).ok_or(Error::InvalidResponse)?;
        Ok(())
    }

    pub fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start_matches(' ');
    }

    /// Match a comma, tolerating surrounding spaces.
    pub fn comma(&mut self) -> Result<(), Error> {
        self.skip_spaces();
        self.literal(",")
    }

    fn number_len(&self, signed: bool, float: bool) -> usize {
        let bytes = self.rest.as_bytes();
        let mut len = 0;
        if signed && bytes.first() == Some(&b'-') {
            len += 1;
        }
        let mut seen_dot = false;
        while let Some(&b) = bytes.get(len) {
            match b {
                b'0'..=b'9' => len += 1,
                b'.' if float && !seen_dot => {
                    seen_dot = true;
                    len += 1;
                }
                _ => break,
            }
        }
        len
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        self.skip_spaces();
        let len = self.number_len(false, false);
        if len == 0 {
            return Err(Error::InvalidResponse);
        }
        let (num, rest) = self.rest.split_at(len);
        self.rest = rest;
        num.parse().map_err(|_| Error::InvalidResponse)
    }

    pub fn i32(&mut self) -> Result<i32, Error> {
        self.skip_spaces();
        let len = self.number_len(true, false);
        if len == 0 || self.rest.as_bytes()[..len] == *b"-" {
            return Err(Error::InvalidResponse);
        }
        let (num, rest) = self.rest.split_at(len);
        self.rest = rest;
        num.parse().map_err(|_| Error::InvalidResponse)
    }

    pub fn f32(&mut self) -> Result<f32, Error> {
        self.skip_spaces();
        let len = self.number_len(true, true);
        if len == 0 {
            return Err(Error::InvalidResponse);
        }
        let (num, rest) = self.rest.split_at(len);
        self.rest = rest;
        num.parse().map_err(|_| Error::InvalidResponse)
    }

    /// Capture a hexadecimal field without `0x` prefix.
    pub fn hex_u32(&mut self) -> Result<u32, Error> {
        self.skip_spaces();
        let len = self
            .rest
            .as_bytes()
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if len == 0 {
            return Err(Error::InvalidResponse);
        }
        let (num, rest) = self.rest.split_at(len);
        self.rest = rest;
        u32::from_str_radix(num, 16).map_err(|_| Error::InvalidResponse)
    }

    /// Capture exactly `n` decimal digits, e.g. one field of a packed
    /// `hhmmss` or `ddmmyy` group.
    pub fn digits(&mut self, n: usize) -> Result<u32, Error> {
        if self.rest.len() < n || !self.rest.as_bytes()[..n].iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidResponse);
        }
        let (num, rest) = self.rest.split_at(n);
        self.rest = rest;
        num.parse().map_err(|_| Error::InvalidResponse)
    }

    /// Capture a double-quoted string into a bounded destination.
    pub fn quoted<const N: usize>(&mut self) -> Result<String<N>, Error> {
        self.skip_spaces();
        self.literal("\"")?;
        let end = self.rest.find('"').ok_or(Error::InvalidResponse)?;
        if end > N {
            return Err(Error::Overflow);
        }
        let mut out = String::new();
        out.push_str(&self.rest[..end]).map_err(|_| Error::Overflow)?;
        self.rest = &self.rest[end + 1..];
        Ok(out)
    }

    /// Everything left of the line.
    pub fn rest(&self) -> &'a str {
        self.rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_typed_fields_in_order() {
        let mut s = Scanner::new("+QIRD: 24,12, 12");
        s.literal("+QIRD:").unwrap();
        assert_eq!(s.u32().unwrap(), 24);
        s.comma().unwrap();
        assert_eq!(s.u32().unwrap(), 12);
        s.comma().unwrap();
        assert_eq!(s.u32().unwrap(), 12);
    }

    #[test]
    fn absent_capture_is_a_format_mismatch() {
        let mut s = Scanner::new("+CSQ: banana");
        s.literal("+CSQ:").unwrap();
        assert_eq!(s.u32(), Err(Error::InvalidResponse));
    }

    #[test]
    fn quoted_capture_checks_destination_capacity() {
        let mut s = Scanner::new("\"much-too-long-for-destination\"");
        assert_eq!(s.quoted::<8>(), Err(Error::Overflow));

        let mut s = Scanner::new("\"ok\",1");
        assert_eq!(s.quoted::<8>().unwrap().as_str(), "ok");
        s.comma().unwrap();
        assert_eq!(s.u32().unwrap(), 1);
    }

    #[test]
    fn negative_and_float_captures() {
        let mut s = Scanner::new("-113,2.5");
        assert_eq!(s.i32().unwrap(), -113);
        s.comma().unwrap();
        assert!((s.f32().unwrap() - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn packed_digit_groups() {
        let mut s = Scanner::new("064019.0");
        assert_eq!(s.digits(2).unwrap(), 6);
        assert_eq!(s.digits(2).unwrap(), 40);
        assert_eq!(s.digits(2).unwrap(), 19);
    }

    #[test]
    fn find_line_skips_interleaved_urcs() {
        let mut lines: heapless::Vec<RespLine, 4> = heapless::Vec::new();
        lines.push(RespLine::try_from("+QIURC: \"pdpdeact\",1").unwrap()).unwrap();
        lines.push(RespLine::try_from("+CSQ: 24,99").unwrap()).unwrap();
        assert_eq!(find_line(&lines, "+CSQ:").unwrap(), "+CSQ: 24,99");
        assert!(find_line(&lines, "+QIRD:").is_err());
    }
}
