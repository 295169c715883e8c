//! Single byte-range parsing for `Range` request headers.
//!
//! Decides which ranges are passed on to the file service and which fall
//! back to the whole file.

/// How a request's `Range` header applies to a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send the whole file with 200.
    Full,
    /// Inclusive byte span to send with 206.
    Partial { start: u64, end: u64 },
    /// Syntactically valid but starts past the end; answer 416.
    Unsatisfiable,
}

impl ByteRange {
    /// Interpret `header` against a file of `size` bytes.
    ///
    /// Accepted forms are `bytes=a-b`, `bytes=a-` and `bytes=-n`. An end past
    /// the last byte is clamped. Anything else, including multiple ranges,
    /// falls back to [`ByteRange::Full`].
    pub fn parse(header: Option<&str>, size: u64) -> Self {
        let Some(header) = header else {
            return Self::Full;
        };
        let Some(ranges) = header.trim().strip_prefix("bytes=") else {
            return Self::Full;
        };
        if ranges.contains(',') {
            return Self::Full;
        }
        let Some((start, end)) = ranges.trim().split_once('-') else {
            return Self::Full;
        };
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix: the last `n` bytes.
            let Ok(n) = end.parse::<u64>() else {
                return Self::Full;
            };
            if n == 0 || size == 0 {
                return Self::Unsatisfiable;
            }
            let n = n.min(size);
            return Self::Partial {
                start: size - n,
                end: size - 1,
            };
        }

        let Ok(start) = start.parse::<u64>() else {
            return Self::Full;
        };
        let end = if end.is_empty() {
            None
        } else {
            match end.parse::<u64>() {
                Ok(end) if end >= start => Some(end),
                _ => return Self::Full,
            }
        };

        if start >= size {
            return Self::Unsatisfiable;
        }
        let last = size - 1;
        Self::Partial {
            start,
            end: end.map_or(last, |e| e.min(last)),
        }
    }
}
