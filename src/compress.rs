//! Reversible compression of JSON snapshots for key-value storage.
//!
//! Values are serialized to JSON text and LZW-coded over the UTF-8 bytes. The
//! code stream is packed at a width that grows with the dictionary, prefixed
//! with the code count, and base64 encoded so the result is safe to store in
//! any text slot. When LZW does not pay off (short or high-entropy input) the
//! plain base64 of the JSON text is stored instead.
//!
//! Decoding never fails loudly: anything that is not a string this module
//! produced decodes to `None`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use std::collections::HashMap;

const LZ_TAG: &str = "lz:";
const PLAIN_TAG: &str = "b64:";

/// Number of single-byte seed phrases.
const SEED_CODES: u32 = 256;

/// Dictionary ceiling. Codes always fit in 16 bits.
const MAX_CODES: u32 = 65_535;

/// Compress a JSON value into an opaque, storage-safe string.
pub fn compress(value: &Value) -> String {
  let text = value.to_string();
  let plain = format!("{}{}", PLAIN_TAG, STANDARD.encode(text.as_bytes()));
  let packed = format!("{}{}", LZ_TAG, STANDARD.encode(lzw_encode(text.as_bytes())));

  if packed.len() < plain.len() {
    packed
  } else {
    plain
  }
}

/// Decompress a string produced by [`compress`].
///
/// Returns `None` for malformed, truncated or foreign input.
pub fn decompress(encoded: &str) -> Option<Value> {
  let bytes = if let Some(body) = encoded.strip_prefix(LZ_TAG) {
    lzw_decode(&STANDARD.decode(body).ok()?)?
  } else if let Some(body) = encoded.strip_prefix(PLAIN_TAG) {
    STANDARD.decode(body).ok()?
  } else {
    return None;
  };

  serde_json::from_slice(&bytes).ok()
}

/// Size of a stored string in bytes.
pub fn byte_size(encoded: &str) -> usize {
  encoded.len()
}

/// Ratio of compressed size to the size of the plain JSON text.
///
/// Below 1.0 means the compressed form is smaller.
pub fn compression_ratio(original: &Value, encoded: &str) -> f64 {
  let raw = original.to_string().len();
  if raw == 0 {
    return 1.0;
  }
  byte_size(encoded) as f64 / raw as f64
}

/// Width in bits of the `index`-th emitted code.
///
/// Before the encoder emits its `index`-th code the dictionary holds at most
/// `SEED_CODES + index` phrases, so every code is strictly below that bound.
/// The decoder derives the same width from the same index.
fn code_width(index: usize) -> u32 {
  let bound = (SEED_CODES as usize + index).min(MAX_CODES as usize) as u32;
  u32::BITS - bound.leading_zeros()
}

fn lzw_encode(input: &[u8]) -> Vec<u8> {
  let mut dictionary: HashMap<Vec<u8>, u32> = (0..SEED_CODES).map(|b| (vec![b as u8], b)).collect();
  let mut next_code = SEED_CODES;
  let mut codes: Vec<u32> = Vec::new();
  let mut phrase: Vec<u8> = Vec::new();

  for &byte in input {
    phrase.push(byte);
    if dictionary.contains_key(&phrase) {
      continue;
    }

    // The phrase without its last byte is known; emit it and learn the new one.
    let known = &phrase[..phrase.len() - 1];
    codes.push(dictionary[known]);
    if next_code < MAX_CODES {
      dictionary.insert(phrase.clone(), next_code);
      next_code += 1;
    }
    phrase.clear();
    phrase.push(byte);
  }
  if !phrase.is_empty() {
    codes.push(dictionary[&phrase]);
  }

  let mut writer = BitWriter::default();
  for (index, code) in codes.iter().enumerate() {
    writer.write(*code, code_width(index));
  }

  let mut out = (codes.len() as u32).to_le_bytes().to_vec();
  out.extend(writer.finish());
  out
}

fn lzw_decode(input: &[u8]) -> Option<Vec<u8>> {
  let header: [u8; 4] = input.get(..4)?.try_into().ok()?;
  let count = u32::from_le_bytes(header) as usize;
  let mut reader = BitReader::new(&input[4..]);

  let mut dictionary: Vec<Vec<u8>> = (0..SEED_CODES).map(|b| vec![b as u8]).collect();
  let mut out = Vec::new();
  let mut previous: Option<Vec<u8>> = None;

  for index in 0..count {
    let code = reader.read(code_width(index))? as usize;

    let entry = if code < dictionary.len() {
      dictionary[code].clone()
    } else if code == dictionary.len() {
      // Phrase defined by the code being decoded (the cScSc case).
      let prev = previous.as_ref()?;
      let mut entry = prev.clone();
      entry.push(prev[0]);
      entry
    } else {
      return None;
    };

    out.extend_from_slice(&entry);
    if let Some(prev) = previous.take() {
      if (dictionary.len() as u32) < MAX_CODES {
        let mut learned = prev;
        learned.push(entry[0]);
        dictionary.push(learned);
      }
    }
    previous = Some(entry);
  }

  Some(out)
}

/// LSB-first bit packer.
#[derive(Default)]
struct BitWriter {
  buf: Vec<u8>,
  acc: u64,
  bits: u32,
}

impl BitWriter {
  fn write(&mut self, value: u32, width: u32) {
    self.acc |= (value as u64) << self.bits;
    self.bits += width;
    while self.bits >= 8 {
      self.buf.push(self.acc as u8);
      self.acc >>= 8;
      self.bits -= 8;
    }
  }

  fn finish(mut self) -> Vec<u8> {
    if self.bits > 0 {
      self.buf.push(self.acc as u8);
    }
    self.buf
  }
}

struct BitReader<'a> {
  data: &'a [u8],
  pos: usize,
  acc: u64,
  bits: u32,
}

impl<'a> BitReader<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self {
      data,
      pos: 0,
      acc: 0,
      bits: 0,
    }
  }

  fn read(&mut self, width: u32) -> Option<u32> {
    while self.bits < width {
      let byte = *self.data.get(self.pos)?;
      self.acc |= (byte as u64) << self.bits;
      self.pos += 1;
      self.bits += 8;
    }
    let value = (self.acc & ((1u64 << width) - 1)) as u32;
    self.acc >>= width;
    self.bits -= width;
    Some(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn shopping_list() -> Value {
    let items: Vec<Value> = (0..40)
      .map(|i| {
        json!({
          "id": format!("item-{}", i),
          "name": "Whole milk 1L",
          "quantity": i % 4 + 1,
          "checked": i % 3 == 0,
          "price": 1.19 + i as f64 * 0.01,
        })
      })
      .collect();
    json!({ "id": "list-1", "name": "Weekly groceries", "items": items })
  }

  #[test]
  fn test_round_trip_repetitive_payload() {
    let value = shopping_list();
    let encoded = compress(&value);
    assert!(encoded.starts_with(LZ_TAG));
    assert_eq!(decompress(&encoded), Some(value));
  }

  #[test]
  fn test_round_trip_scalars_and_empty_containers() {
    for value in [
      Value::Null,
      json!(true),
      json!(0),
      json!(-42),
      json!(3.5),
      json!(""),
      json!([]),
      json!({}),
      json!("Käse & Brötchen 🧀"),
      json!({"nested": {"deeper": [1, [2, [3, {}]]]}}),
    ] {
      assert_eq!(decompress(&compress(&value)), Some(value.clone()), "value: {}", value);
    }
  }

  #[test]
  fn test_round_trip_long_runs() {
    // Exercises the case where a code refers to the phrase being defined.
    let value = json!("a".repeat(5_000));
    let encoded = compress(&value);
    assert!(encoded.starts_with(LZ_TAG));
    assert_eq!(decompress(&encoded), Some(value));
  }

  #[test]
  fn test_round_trip_past_dictionary_ceiling() {
    let words: Vec<String> = (0..30_000).map(|i| format!("sku-{:x}-{}", i * 7919, i % 13)).collect();
    let value = json!(words);
    assert_eq!(decompress(&compress(&value)), Some(value));
  }

  #[test]
  fn test_short_input_uses_plain_encoding() {
    let value = json!(1);
    assert!(compress(&value).starts_with(PLAIN_TAG));
  }

  #[test]
  fn test_repetitive_payload_shrinks() {
    let value = shopping_list();
    let encoded = compress(&value);
    assert!(compression_ratio(&value, &encoded) < 1.0);
    assert_eq!(byte_size(&encoded), encoded.len());
  }

  #[test]
  fn test_decompress_fails_soft() {
    assert_eq!(decompress(""), None);
    assert_eq!(decompress("not compressed"), None);
    assert_eq!(decompress("lz:!!!not base64"), None);
    assert_eq!(decompress("b64:bm90IGpzb24="), None); // "not json"
    assert_eq!(decompress("lz:AQ=="), None); // truncated header

    let encoded = compress(&shopping_list());
    let truncated = &encoded[..encoded.len() / 2];
    assert_eq!(decompress(truncated), None);
  }
}
