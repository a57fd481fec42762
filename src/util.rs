use std::time::{SystemTime, UNIX_EPOCH};

/// Truncating hex rendering of a byte buffer, for value data in debug output.
pub struct Hex<'a>(&'a [u8], usize);

impl<'a> Hex<'a> {
    pub fn partial(data: &'a [u8], len: usize) -> Self {
        Self(data, len)
    }
}

impl<'a> std::fmt::Debug for Hex<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.0.len().min(self.1);
        if shown < self.0.len() {
            write!(
                f,
                "[{}..., {} bytes]",
                hex::encode(&self.0[..shown]),
                self.0.len()
            )
        } else {
            write!(f, "[{}]", hex::encode(self.0))
        }
    }
}

/// current wall clock time in POSIX seconds
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
