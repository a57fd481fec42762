//! Text import and export for registry branches.
//!
//! The primary format (version 2) is close to the REGEDIT export format,
//! except that strings and key names carry `\x` escapes for arbitrary 16-bit
//! characters, the modification time follows the key path, and the string
//! flavors of values are written as strings rather than hex. The legacy
//! version 1 format is write-only.

use std::io::{self, BufRead, Write};

use tracing::warn;

use crate::error::{RegError, Result};
use crate::registry::Registry;
use crate::tree::{
    self, insert_value, KeyFlags, KeyRef, KeyValue, REG_BINARY, REG_DWORD, REG_EXPAND_SZ,
    REG_MULTI_SZ, REG_SZ,
};
use crate::util;

const HEADER_PREFIX: &str = "WINE REGISTRY Version ";
const V2_HEADER: &str = "WINE REGISTRY Version 2";

/// named escapes for the control range; '.' marks the octal fallback
const CTRL_ESCAPES: &[u8; 32] = b".......abtnvfr.............e....";

fn file_err(e: io::Error) -> RegError {
    RegError::File(e.to_string())
}

/// write a wide string with escaping: the two delimiter characters and the
/// backslash are backslash-escaped, characters outside the printable ASCII
/// range become `\x` or octal escapes, and a terminating nul is dropped.
/// returns the number of bytes written.
pub(crate) fn dump_str<W: Write>(w: &mut W, s: &[u16], delims: [u8; 2]) -> io::Result<usize> {
    let mut count = 0;
    for (i, &ch) in s.iter().enumerate() {
        let next = s.get(i + 1).copied();
        if ch > 127 {
            // fixed width when the next character would extend the escape
            let wide = matches!(next, Some(n) if n < 128 && (n as u8).is_ascii_hexdigit());
            let out = if wide {
                format!("\\x{:04x}", ch)
            } else {
                format!("\\x{:x}", ch)
            };
            w.write_all(out.as_bytes())?;
            count += out.len();
        } else if ch < 32 {
            if ch == 0 && i + 1 == s.len() {
                // the terminating nul is not written
            } else if CTRL_ESCAPES[ch as usize] != b'.' {
                w.write_all(&[b'\\', CTRL_ESCAPES[ch as usize]])?;
                count += 2;
            } else {
                let octal_follows =
                    matches!(next, Some(n) if (b'0' as u16..=b'7' as u16).contains(&n));
                let out = if octal_follows {
                    format!("\\{:03o}", ch)
                } else {
                    format!("\\{:o}", ch)
                };
                w.write_all(out.as_bytes())?;
                count += out.len();
            }
        } else {
            let b = ch as u8;
            if b == b'\\' || b == delims[0] || b == delims[1] {
                w.write_all(&[b'\\'])?;
                count += 1;
            }
            w.write_all(&[b])?;
            count += 1;
        }
    }
    Ok(count)
}

/// parse an escaped string up to the given delimiter; returns the decoded
/// units and the number of input bytes consumed, including the delimiter.
/// `None` when the delimiter is missing.
pub(crate) fn parse_str(src: &str, endchar: u8) -> Option<(Vec<u16>, usize)> {
    let b = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() && b[i] != endchar {
        if b[i] != b'\\' {
            out.push(b[i] as u16);
            i += 1;
            continue;
        }
        i += 1;
        let c = *b.get(i)?;
        match c {
            b'a' => {
                out.push(7);
                i += 1;
            }
            b'b' => {
                out.push(8);
                i += 1;
            }
            b'e' => {
                out.push(27);
                i += 1;
            }
            b'f' => {
                out.push(12);
                i += 1;
            }
            b'n' => {
                out.push(10);
                i += 1;
            }
            b'r' => {
                out.push(13);
                i += 1;
            }
            b't' => {
                out.push(9);
                i += 1;
            }
            b'v' => {
                out.push(11);
                i += 1;
            }
            b'x' => {
                i += 1;
                if !b.get(i).is_some_and(|c| c.is_ascii_hexdigit()) {
                    out.push(b'x' as u16);
                } else {
                    let mut v: u16 = 0;
                    let mut digits = 0;
                    while digits < 4 && b.get(i).is_some_and(|c| c.is_ascii_hexdigit()) {
                        v = (v << 4) | (b[i] as char).to_digit(16).unwrap_or(0) as u16;
                        i += 1;
                        digits += 1;
                    }
                    out.push(v);
                }
            }
            b'0'..=b'7' => {
                let mut v: u16 = (c - b'0') as u16;
                i += 1;
                let mut digits = 1;
                while digits < 3 && b.get(i).is_some_and(|c| (b'0'..=b'7').contains(c)) {
                    v = (v << 3) | (b[i] - b'0') as u16;
                    i += 1;
                    digits += 1;
                }
                out.push(v);
            }
            other => {
                out.push(other as u16);
                i += 1;
            }
        }
    }
    if i >= b.len() {
        return None; // delimiter not found
    }
    Some((out, i + 1))
}

/// reinterpret value data as 16-bit units; a trailing odd byte is dropped
fn data_units(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// write the full path of a key, root label first, components separated by
/// doubled backslashes
fn dump_path<W: Write>(w: &mut W, reg: &Registry, key: &KeyRef) -> io::Result<()> {
    let (name, parent) = {
        let k = key.borrow();
        (k.name.clone(), k.parent.upgrade())
    };
    if let Some(parent) = &parent {
        dump_path(w, reg, parent)?;
    } else if name.is_some() {
        // an orphan shows up here only through debug dumps
        write!(w, "?????")?;
    }
    match &name {
        Some(n) => {
            write!(w, "\\\\")?;
            dump_str(w, n, [b'[', b']'])?;
        }
        None => {
            if let Some(label) = reg.root_label(key) {
                write!(w, "{}", label)?;
            }
        }
    }
    Ok(())
}

fn dump_value<W: Write>(w: &mut W, value: &KeyValue) -> io::Result<()> {
    let mut count;
    if !value.name.is_empty() {
        w.write_all(b"\"")?;
        count = 1 + dump_str(w, &value.name, [b'"', b'"'])?;
        w.write_all(b"\"=")?;
        count += 2;
    } else {
        w.write_all(b"@=")?;
        count = 2;
    }
    match value.ty {
        REG_SZ | REG_EXPAND_SZ | REG_MULTI_SZ => {
            if value.ty != REG_SZ {
                write!(w, "str({}):", value.ty)?;
            }
            w.write_all(b"\"")?;
            dump_str(w, &data_units(&value.data), [b'"', b'"'])?;
            w.write_all(b"\"")?;
        }
        REG_DWORD if value.data.len() == 4 => {
            let dw = u32::from_le_bytes([
                value.data[0],
                value.data[1],
                value.data[2],
                value.data[3],
            ]);
            write!(w, "dword:{:08x}", dw)?;
        }
        _ => {
            if value.ty == REG_BINARY {
                w.write_all(b"hex:")?;
                count += 4;
            } else {
                let tag = format!("hex({:x}):", value.ty);
                w.write_all(tag.as_bytes())?;
                count += tag.len();
            }
            let len = value.data.len();
            for (i, byte) in value.data.iter().enumerate() {
                write!(w, "{:02x}", byte)?;
                count += 2;
                if i + 1 < len {
                    w.write_all(b",")?;
                    count += 1;
                    if count > 76 {
                        w.write_all(b"\\\n  ")?;
                        count = 2;
                    }
                }
            }
        }
    }
    w.write_all(b"\n")
}

/// write a branch in the version 2 format
fn save_subkeys<W: Write>(w: &mut W, reg: &Registry, key: &KeyRef) -> io::Result<()> {
    let k = key.borrow();
    if k.flags.contains(KeyFlags::VOLATILE) {
        return Ok(());
    }
    // keys with no values but with subkeys are saved implicitly by the paths
    // of their subkeys
    if k.level >= reg.saving_level && (!k.values.is_empty() || k.subkeys.is_empty()) {
        w.write_all(b"\n[")?;
        dump_path(w, reg, key)?;
        writeln!(w, "] {}", k.modif)?;
        for value in &k.values {
            dump_value(w, value)?;
        }
    }
    for sub in &k.subkeys {
        save_subkeys(w, reg, sub)?;
    }
    Ok(())
}

/// propagate each subtree's maximum level up to its top; the version 1
/// writer prunes whole subtrees on the level alone
fn update_level(key: &KeyRef) -> i32 {
    let subkeys: Vec<KeyRef> = key.borrow().subkeys.clone();
    let mut max = key.borrow().level;
    for sub in &subkeys {
        max = max.max(update_level(sub));
    }
    key.borrow_mut().level = max;
    max
}

/// version 1 string encoding: `\uXXXX` for anything outside printable ASCII
/// plus newline and the equals sign; stops at the first nul
fn save_string_v1<W: Write>(w: &mut W, s: &[u16]) -> io::Result<()> {
    for &c in s {
        if c == 0 {
            break;
        }
        if c > 0x7f || c == b'\n' as u16 || c == b'=' as u16 {
            write!(w, "\\u{:04x}", c)?;
        } else {
            if c == b'\\' as u16 {
                w.write_all(b"\\")?;
            }
            w.write_all(&[c as u8])?;
        }
    }
    Ok(())
}

/// write a branch in the legacy indentation-based format
fn save_subkeys_v1<W: Write>(
    w: &mut W,
    key: &KeyRef,
    nesting: usize,
    saving_level: i32,
) -> io::Result<()> {
    let k = key.borrow();
    if k.flags.contains(KeyFlags::VOLATILE) {
        return Ok(());
    }
    if k.level < saving_level {
        return Ok(());
    }
    for value in &k.values {
        for _ in 0..nesting {
            w.write_all(b"\t")?;
        }
        save_string_v1(w, &value.name)?;
        write!(w, "={},0,", value.ty)?;
        if value.ty == REG_SZ || value.ty == REG_EXPAND_SZ {
            save_string_v1(w, &data_units(&value.data))?;
        } else {
            for byte in &value.data {
                write!(w, "{:02x}", byte)?;
            }
        }
        w.write_all(b"\n")?;
    }
    for sub in &k.subkeys {
        for _ in 0..nesting {
            w.write_all(b"\t")?;
        }
        let name = sub.borrow().name.clone().unwrap_or_default();
        save_string_v1(w, &name)?;
        w.write_all(b"\n")?;
        save_subkeys_v1(w, sub, nesting + 1, saving_level)?;
    }
    Ok(())
}

/// save a registry branch in the format selected by the registry's saving
/// version
pub fn save_registry<W: Write>(reg: &Registry, key: &KeyRef, mut w: W) -> Result<()> {
    if key.borrow().flags.contains(KeyFlags::DELETED) {
        return Err(RegError::KeyDeleted);
    }
    let res = (|| -> io::Result<()> {
        writeln!(w, "{}{}", HEADER_PREFIX, reg.saving_version)?;
        if reg.saving_version == 2 {
            save_subkeys(&mut w, reg, key)?;
        } else {
            update_level(key);
            save_subkeys_v1(&mut w, key, 0, reg.saving_level)?;
        }
        w.flush()
    })();
    res.map_err(file_err)
}

struct LineReader<R> {
    inner: R,
    line: u32,
    buf: String,
}

impl<R: BufRead> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            buf: String::new(),
        }
    }

    /// read the next line without its terminator; `false` at end of input
    fn next_line(&mut self) -> io::Result<bool> {
        self.buf.clear();
        if self.inner.read_line(&mut self.buf)? == 0 {
            return Ok(false);
        }
        self.line += 1;
        if self.buf.ends_with('\n') {
            self.buf.pop();
        }
        if self.buf.ends_with('\r') {
            self.buf.pop();
        }
        Ok(true)
    }
}

/// map a data type tag to (stored type, type to assume while parsing, tag length)
fn get_data_type(buffer: &str) -> Option<(u32, u32, usize)> {
    const TYPES: &[(&str, u32, u32)] = &[
        ("\"", REG_SZ, REG_SZ),
        ("str:\"", REG_SZ, REG_SZ),
        ("str(2):\"", REG_EXPAND_SZ, REG_SZ),
        ("str(7):\"", REG_MULTI_SZ, REG_SZ),
        ("hex:", REG_BINARY, REG_BINARY),
        ("dword:", REG_DWORD, REG_DWORD),
    ];
    for (tag, ty, parse_type) in TYPES {
        if buffer.starts_with(tag) {
            return Some((*ty, *parse_type, tag.len()));
        }
    }
    // "hex(NN):" carries the stored type in hex
    let rest = buffer.strip_prefix("hex(")?;
    let digits = rest
        .bytes()
        .take_while(|b| b.is_ascii_hexdigit())
        .count();
    let ty = if digits == 0 {
        0
    } else {
        u32::from_str_radix(&rest[..digits], 16).ok()?
    };
    if !rest[digits..].starts_with("):") {
        return None;
    }
    Some((ty, REG_BINARY, 4 + digits + 2))
}

/// parse a comma-separated list of hex bytes into `out`; returns the number
/// of input bytes consumed
fn parse_hex(out: &mut Vec<u8>, buffer: &str) -> usize {
    let b = buffer.as_bytes();
    let mut i = 0;
    while i < b.len() && b[i].is_ascii_hexdigit() {
        let mut val = (b[i] as char).to_digit(16).unwrap_or(0) as u8;
        i += 1;
        if i < b.len() && b[i].is_ascii_hexdigit() {
            val = (val << 4) | (b[i] as char).to_digit(16).unwrap_or(0) as u8;
            i += 1;
        }
        out.push(val);
        if i < b.len() && b[i] == b',' {
            i += 1;
        }
    }
    i
}

/// parse a `[path] modif` line and create the key below the load target
fn load_key(reg: &Registry, base: &KeyRef, buffer: &str, line: u32) -> Result<Option<KeyRef>> {
    let Some((path, consumed)) = parse_str(buffer, b']') else {
        warn!(line, "malformed key: {:?}", buffer);
        return Ok(None);
    };
    let modif = buffer[consumed..]
        .split_whitespace()
        .next()
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or_else(util::now);
    // skip the root label the saver wrote; keys land below the load target
    let rel = match path.iter().position(|&c| c == b'\\' as u16) {
        Some(i) => &path[i + 1..],
        None => &[][..],
    };
    match tree::create_key(base, rel, None, 0, modif, reg.current_level) {
        Ok((key, _)) => Ok(Some(key)),
        Err(RegError::OutOfMemory) => Err(RegError::OutOfMemory),
        Err(e) => {
            warn!(line, error = %e, "cannot create key: {:?}", buffer);
            Ok(None)
        }
    }
}

/// parse one value line, consuming continuation lines for hex data
fn load_value<R: BufRead>(
    reg: &Registry,
    key: &KeyRef,
    line: &str,
    r: &mut LineReader<R>,
) -> Result<()> {
    let lineno = r.line;
    let (name, mut pos) = if line.starts_with('@') {
        (Vec::new(), 1)
    } else {
        match parse_str(&line[1..], b'"') {
            Some((name, consumed)) => (name, consumed + 1),
            None => {
                warn!(line = lineno, "malformed value name: {:?}", line);
                return Ok(());
            }
        }
    };
    if line.as_bytes().get(pos) != Some(&b'=') {
        warn!(line = lineno, "malformed value name: {:?}", line);
        return Ok(());
    }
    pos += 1;

    let Some((ty, parse_type, taglen)) = get_data_type(&line[pos..]) else {
        warn!(line = lineno, "malformed value: {:?}", line);
        return Ok(());
    };
    pos += taglen;

    let data: Vec<u8> = match parse_type {
        REG_SZ => {
            let Some((units, _)) = parse_str(&line[pos..], b'"') else {
                warn!(line = lineno, "malformed value: {:?}", line);
                return Ok(());
            };
            // values of string type keep their terminating nul
            let mut data = Vec::with_capacity((units.len() + 1) * 2);
            for u in &units {
                data.extend_from_slice(&u.to_le_bytes());
            }
            data.extend_from_slice(&[0, 0]);
            data
        }
        REG_DWORD => {
            let rest = line[pos..].trim_start();
            let digits = rest.bytes().take_while(|b| b.is_ascii_hexdigit()).count();
            let dw = u32::from_str_radix(&rest[..digits], 16).unwrap_or(0);
            dw.to_le_bytes().to_vec()
        }
        _ => {
            // a hex byte list, possibly spread over continuation lines
            let mut data = Vec::new();
            let mut rest = line[pos..].to_owned();
            loop {
                let consumed = parse_hex(&mut data, &rest);
                let tail = rest[consumed..].trim_start();
                if tail.is_empty() {
                    break;
                }
                if !tail.starts_with('\\') {
                    warn!(line = r.line, "malformed hex list: {:?}", rest);
                    return Ok(());
                }
                if !r.next_line().map_err(file_err)? {
                    warn!(line = r.line, "unterminated hex list");
                    return Ok(());
                }
                rest = r.buf.trim_start().to_owned();
            }
            data
        }
    };

    let mut k = key.borrow_mut();
    let i = insert_value(&mut k, &name);
    let value = &mut k.values[i];
    value.ty = ty;
    value.data = data;
    // bump the level but keep the modification time from the key line
    k.level = k.level.max(reg.current_level);
    Ok(())
}

/// load keys and values from a version 2 text stream into `base`.
///
/// Parse errors are reported per line and do not stop the load; a missing or
/// foreign header does, before anything is created.
pub fn load_keys<R: BufRead>(reg: &Registry, base: &KeyRef, reader: R) -> Result<()> {
    let mut r = LineReader::new(reader);
    if !r.next_line().map_err(file_err)? || r.buf != V2_HEADER {
        return Err(RegError::NotRegistryFile);
    }
    let mut current: Option<KeyRef> = None;
    while r.next_line().map_err(file_err)? {
        let line = r.buf.trim_start().to_owned();
        match line.bytes().next() {
            Some(b'[') => current = load_key(reg, base, &line[1..], r.line)?,
            Some(b'"') | Some(b'@') => match &current {
                Some(key) => load_value(reg, key, &line, &mut r)?,
                None => warn!(line = r.line, "value without a key: {:?}", line),
            },
            Some(b'#') | Some(b';') | None => {}
            _ => warn!(line = r.line, "unrecognized input: {:?}", line),
        }
    }
    Ok(())
}
