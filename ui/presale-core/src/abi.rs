//! Hand-built EVM ABI encoding for the handful of calls the dashboard makes.
//!
//! Only static argument types are encoded (address, uint256). Return data is read word by
//! word; the one dynamic return (an array of static tuples) is decoded by following its
//! head offset.

use alloy_primitives::{hex, keccak256, Address, B256, U256};

use crate::error::{Result, WalletError};

pub const WORD: usize = 32;

/// `Error(string)` selector used by `require`/`revert` reasons.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    Address(Address),
    Uint(U256),
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of an event.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// An indexed address, as it appears in a log topic.
pub fn address_topic(address: Address) -> B256 {
    address.into_word()
}

/// Calldata for `signature` with `args`.
pub fn encode_call(signature: &str, args: &[Arg]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        match arg {
            Arg::Address(address) => data.extend_from_slice(address.into_word().as_slice()),
            Arg::Uint(value) => data.extend_from_slice(&value.to_be_bytes::<WORD>()),
        }
    }
    data
}

pub fn to_hex(data: &[u8]) -> String {
    hex::encode_prefixed(data)
}

pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| WalletError::Decode(format!("bad hex {text:?}: {e}")))
}

/// Cursor over ABI-encoded return data.
#[derive(Clone, Copy, Debug)]
pub struct Words<'a> {
    data: &'a [u8],
}

impl<'a> Words<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len() / WORD
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn word(&self, index: usize) -> Result<&'a [u8]> {
        let start = index * WORD;
        self.data.get(start..start + WORD).ok_or_else(|| {
            WalletError::Decode(format!(
                "return data too short: word {index} of {} bytes",
                self.data.len()
            ))
        })
    }

    pub fn uint(&self, index: usize) -> Result<U256> {
        Ok(U256::from_be_slice(self.word(index)?))
    }

    pub fn u64(&self, index: usize) -> Result<u64> {
        to_u64(self.uint(index)?)
    }

    pub fn u8(&self, index: usize) -> Result<u8> {
        let value = self.u64(index)?;
        u8::try_from(value).map_err(|_| WalletError::Decode(format!("{value} does not fit in u8")))
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        match self.u64(index)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WalletError::Decode(format!("{other} is not a bool"))),
        }
    }

    pub fn address(&self, index: usize) -> Result<Address> {
        let word = self.word(index)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(WalletError::Decode("dirty address padding".into()));
        }
        Ok(Address::from_slice(&word[12..]))
    }

    /// A `T[]` of static tuples with `fields` words each, whose head offset sits in word
    /// `index`. Returns one sub-cursor per element.
    pub fn tuple_array(&self, index: usize, fields: usize) -> Result<Vec<Words<'a>>> {
        let offset = to_usize(self.uint(index)?)?;
        if offset % WORD != 0 {
            return Err(WalletError::Decode(format!("misaligned array offset {offset}")));
        }
        let tail = Words::new(self.data.get(offset..).unwrap_or_default());
        let count = to_usize(tail.uint(0)?)?;
        let needed = count
            .checked_mul(fields)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| WalletError::Decode("array length overflow".into()))?;
        if tail.len() < needed {
            return Err(WalletError::Decode(format!(
                "array of {count} elements truncated"
            )));
        }
        Ok((0..count)
            .map(|i| {
                let start = (1 + i * fields) * WORD;
                Words::new(&tail.data[start..start + fields * WORD])
            })
            .collect())
    }
}

pub fn to_u64(value: U256) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(WalletError::Decode(format!("{value} does not fit in u64")));
    }
    Ok(value.as_limbs()[0])
}

fn to_usize(value: U256) -> Result<usize> {
    usize::try_from(to_u64(value)?).map_err(|_| WalletError::Decode("length overflow".into()))
}

/// Extract the message from `Error(string)` revert data, if that is what it is.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    let words = Words::new(payload);
    let offset = to_usize(words.uint(0).ok()?).ok()?;
    let tail = payload.get(offset..)?;
    let len = to_usize(Words::new(tail).uint(0).ok()?).ok()?;
    let bytes = tail.get(WORD..WORD + len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

#[cfg(test)]
pub(crate) mod encode {
    //! Encoders for building fake return data in tests.

    use super::*;

    pub fn words(values: &[U256]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes::<WORD>()).collect()
    }

    pub fn tuple_array(rows: &[Vec<U256>]) -> Vec<u8> {
        let mut out = words(&[U256::from(WORD), U256::from(rows.len())]);
        for row in rows {
            out.extend(words(row));
        }
        out
    }

    pub fn revert(reason: &str) -> Vec<u8> {
        let mut out = ERROR_STRING_SELECTOR.to_vec();
        out.extend(words(&[U256::from(WORD), U256::from(reason.len())]));
        let mut padded = reason.as_bytes().to_vec();
        padded.resize(reason.len().div_ceil(WORD) * WORD, 0);
        out.extend(padded);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_known_erc20_values() {
        assert_eq!(selector("decimals()"), [0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
    }

    #[test]
    fn encodes_static_arguments() {
        let spender = Address::repeat_byte(0x11);
        let data = encode_call(
            "approve(address,uint256)",
            &[Arg::Address(spender), Arg::Uint(U256::from(1_000u64))],
        );
        assert_eq!(data.len(), 4 + 2 * WORD);
        let words = Words::new(&data[4..]);
        assert_eq!(words.address(0).unwrap(), spender);
        assert_eq!(words.uint(1).unwrap(), U256::from(1_000u64));
    }

    #[test]
    fn decodes_tuple_arrays() {
        let data = encode::tuple_array(&[
            vec![U256::from(1u8), U256::from(2u8)],
            vec![U256::from(3u8), U256::from(4u8)],
        ]);
        let rows = Words::new(&data).tuple_array(0, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].uint(0).unwrap(), U256::from(3u8));
        assert_eq!(rows[1].uint(1).unwrap(), U256::from(4u8));

        let empty = encode::tuple_array(&[]);
        assert!(Words::new(&empty).tuple_array(0, 6).unwrap().is_empty());
    }

    #[test]
    fn truncated_data_is_a_decode_error() {
        let data = encode::words(&[U256::from(WORD), U256::from(3u8), U256::from(1u8)]);
        assert!(matches!(
            Words::new(&data).tuple_array(0, 2),
            Err(WalletError::Decode(_))
        ));
        assert!(Words::new(&[0u8; 16]).uint(0).is_err());
    }

    #[test]
    fn bools_and_small_ints_are_range_checked() {
        let data = encode::words(&[U256::from(1u8), U256::from(2u8), U256::from(300u64)]);
        let words = Words::new(&data);
        assert!(words.bool(0).unwrap());
        assert!(words.bool(1).is_err());
        assert!(words.u8(2).is_err());
    }

    #[test]
    fn revert_reason_round_trip() {
        let data = encode::revert("Presale: below minimum");
        assert_eq!(decode_revert_reason(&data).as_deref(), Some("Presale: below minimum"));
        assert_eq!(decode_revert_reason(&[0xde, 0xad]), None);
    }

    #[test]
    fn address_topics_are_left_padded() {
        let topic = address_topic(Address::repeat_byte(0xab));
        assert!(topic[..12].iter().all(|b| *b == 0));
        assert!(topic[12..].iter().all(|b| *b == 0xab));
    }
}
