//! Ticker Frame Parser
//!
//! Scan-based extraction of ticker records from OKX push frames. This sits
//! on the hot path for every inbound frame, so it avoids building a JSON
//! tree: it locates the `data` array by substring search, walks objects by
//! bracket depth, and pulls each field with a `"key":` lookup.
//!
//! # Accepted Shape
//! ```json
//! {"arg":{"channel":"tickers","instId":"BTC-USDT"},
//!  "data":[{"instType":"SPOT","instId":"BTC-USDT","last":"43250.5",...}]}
//! ```
//!
//! The scan is not a JSON validator. Escaped quotes inside values, nested
//! arrays inside a ticker and `\u` escapes are unsupported: values end at
//! the next `"` and numeric text is not checked.

use crate::domain::ticker::TickerRecord;

const CHANNEL_KEY: &str = "\"channel\"";
const TICKERS_MARKER: &str = "\"tickers\"";
const DATA_KEY: &str = "\"data\"";

/// Whitespace recognised between tokens.
const fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Parse a push frame into ticker records, in source order.
///
/// Returns `None` when the frame is not a ticker push, when the `data`
/// array is unbalanced, or when no object in it carries an `instId`.
/// Objects without an `instId` are dropped silently.
#[must_use]
pub fn parse_tickers(frame: &str) -> Option<Vec<TickerRecord>> {
    if !frame.contains(CHANNEL_KEY) || !frame.contains(TICKERS_MARKER) {
        return None;
    }

    let data = data_array(frame)?;

    let records: Vec<TickerRecord> = ObjectSpans::new(data)
        .filter_map(parse_ticker_object)
        .collect();

    if records.is_empty() { None } else { Some(records) }
}

/// Contents of the `data` array, without the enclosing brackets.
fn data_array(frame: &str) -> Option<&str> {
    let data_pos = frame.find(DATA_KEY)?;
    let open = data_pos + frame[data_pos..].find('[')?;
    let bytes = frame.as_bytes();

    let mut depth = 1usize;
    let mut pos = open + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&frame[open + 1..pos]);
                }
            }
            _ => {}
        }
        pos += 1;
    }

    None
}

/// Iterator over the `{...}` spans of an array body.
///
/// Stops at the first token that does not open an object, or at an object
/// whose braces never balance.
struct ObjectSpans<'a> {
    body: &'a str,
    pos: usize,
}

impl<'a> ObjectSpans<'a> {
    const fn new(body: &'a str) -> Self {
        Self { body, pos: 0 }
    }
}

impl<'a> Iterator for ObjectSpans<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.body.as_bytes();

        while self.pos < bytes.len() && (bytes[self.pos] == b',' || is_space(bytes[self.pos])) {
            self.pos += 1;
        }

        if bytes.get(self.pos) != Some(&b'{') {
            self.pos = bytes.len();
            return None;
        }

        let start = self.pos;
        let mut depth = 1usize;
        let mut pos = start + 1;
        while pos < bytes.len() && depth > 0 {
            match bytes[pos] {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
            pos += 1;
        }

        if depth != 0 {
            self.pos = bytes.len();
            return None;
        }

        self.pos = pos;
        Some(&self.body[start..pos])
    }
}

/// Value for `key` in a flat object view, or `""` if absent.
///
/// Quoted values run to the next `"`; an unterminated quote yields `""`.
/// Bare values run to `,`, `}`, `]`, whitespace or the end of input.
fn field<'a>(object: &'a str, key: &str) -> &'a str {
    let pattern = format!("\"{key}\":");
    let Some(found) = object.find(&pattern) else {
        return "";
    };

    let bytes = object.as_bytes();
    let mut pos = found + pattern.len();
    while pos < bytes.len() && is_space(bytes[pos]) {
        pos += 1;
    }

    match bytes.get(pos) {
        None => "",
        Some(b'"') => {
            let start = pos + 1;
            object[start..].find('"').map_or("", |len| &object[start..start + len])
        }
        Some(_) => {
            let len = bytes[pos..]
                .iter()
                .position(|&b| matches!(b, b',' | b'}' | b']') || is_space(b))
                .unwrap_or(bytes.len() - pos);
            &object[pos..pos + len]
        }
    }
}

fn parse_ticker_object(object: &str) -> Option<TickerRecord> {
    let get = |key: &str| field(object, key).to_owned();

    let record = TickerRecord {
        inst_type: get("instType"),
        inst_id: get("instId"),
        last: get("last"),
        last_sz: get("lastSz"),
        ask_px: get("askPx"),
        ask_sz: get("askSz"),
        bid_px: get("bidPx"),
        bid_sz: get("bidSz"),
        open_24h: get("open24h"),
        high_24h: get("high24h"),
        low_24h: get("low24h"),
        vol_ccy_24h: get("volCcy24h"),
        vol_24h: get("vol24h"),
        sod_utc0: get("sodUtc0"),
        sod_utc8: get("sodUtc8"),
        ts: get("ts"),
    };

    if record.is_valid() {
        Some(record)
    } else {
        tracing::trace!(object_len = object.len(), "Dropping ticker object without instId");
        None
    }
}
