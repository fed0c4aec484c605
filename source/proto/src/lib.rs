//! # snoop-proto
//!
//! Wire types used by the `busybody` bus sniffer. Extracted as a separate
//! crate to allow host-side decoders (like `magpie`) to share the token
//! alphabet and frame definitions

#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

use core::mem::size_of;

////////////////////////////////////////////////////////////////////////////////
// Tokens
////////////////////////////////////////////////////////////////////////////////

/// One decoded symbol of bus traffic.
///
/// Every qualifying clock or data edge produces exactly one token. The
/// discriminant of each variant *is* its wire symbol, which makes the
/// token/symbol mapping bijective by construction: [`Token::symbol`] and
/// [`Token::from_symbol`] are inverses.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Token {
    /// A start condition opened a transaction
    Start = b'S',
    /// A stop condition closed the transaction
    Stop = b's',
    /// A data bit sampled low
    Bit0 = b'0',
    /// A data bit sampled high
    Bit1 = b'1',
    /// Ninth-edge acknowledge (data held low)
    Ack = b'+',
    /// Ninth-edge not-acknowledge (data left high)
    Nack = b'-',
    /// Direction bit of the first byte: controller will read
    ReadDir = b'R',
    /// Direction bit of the first byte: controller will write
    WriteDir = b'W',
}

impl Token {
    /// All tokens, in wire-symbol order. Handy for exhaustive tests and
    /// host-side legends.
    pub const ALL: [Token; 8] = [
        Token::Start,
        Token::Stop,
        Token::Bit0,
        Token::Bit1,
        Token::Ack,
        Token::Nack,
        Token::ReadDir,
        Token::WriteDir,
    ];

    /// The single-byte wire symbol for this token.
    #[inline]
    pub const fn symbol(self) -> u8 {
        self as u8
    }

    /// The inverse of [`Token::symbol`]. Returns `None` for bytes outside
    /// the alphabet.
    #[inline]
    pub const fn from_symbol(sym: u8) -> Option<Self> {
        match sym {
            b'S' => Some(Token::Start),
            b's' => Some(Token::Stop),
            b'0' => Some(Token::Bit0),
            b'1' => Some(Token::Bit1),
            b'+' => Some(Token::Ack),
            b'-' => Some(Token::Nack),
            b'R' => Some(Token::ReadDir),
            b'W' => Some(Token::WriteDir),
            _ => None,
        }
    }

    /// Does this token terminate a byte (the ninth clock edge)?
    #[inline]
    pub const fn is_ack_or_nack(self) -> bool {
        matches!(self, Token::Ack | Token::Nack)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Frames
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum Error {
    /// The provided buffer is not suitable in size
    InsufficientSize,
    /// Ran out of room while filling a buffer, this is likely
    /// an error in the `snoop-proto` library.
    UnexpectedBufferFull,
    /// The cobs decoding process failed. The message was likely
    /// malformed or not a snoop-proto frame
    CobsDecodeFailed,
    /// Cobs decoding succeeded, but the resulting data was not
    /// a valid snoop-proto frame
    MalformedFrame,
}

/// One drain's worth of token symbols, plus the number of tokens the
/// sniffer had to drop since the previous frame.
///
/// `dropped` is cumulative-delta, not cumulative-total: a well behaved
/// link sums the values it receives.
#[derive(Debug, PartialEq)]
pub struct SnoopFrame<'a> {
    pub dropped: u16,
    pub symbols: &'a [u8],
}

impl<'a> SnoopFrame<'a> {
    /// Create a new frame from a dropped count and a run of symbols
    #[inline]
    pub fn new(dropped: u16, symbols: &'a [u8]) -> Self {
        Self { dropped, symbols }
    }

    /// Calculate the size required to encode this frame
    #[inline]
    pub fn buffer_required(&self) -> usize {
        // Room for COBS(dropped:u16 + symbols:[u8; len]) plus a terminating zero
        cobs::max_encoding_length(self.symbols.len() + size_of::<u16>() + 1)
    }

    /// Encodes the current [SnoopFrame] into the given buffer
    pub fn encode_to<'b>(&self, out_buf: &'b mut [u8]) -> Result<&'b mut [u8], Error> {
        let SnoopFrame { dropped, symbols } = self;
        if out_buf.len() < self.buffer_required() {
            return Err(Error::InsufficientSize);
        }

        let mut encoder = cobs::CobsEncoder::new(out_buf);
        encoder
            .push(&dropped.to_le_bytes())
            .map_err(|_| Error::UnexpectedBufferFull)?;
        encoder
            .push(symbols)
            .map_err(|_| Error::UnexpectedBufferFull)?;
        let used = encoder
            .finalize()
            .map_err(|_| Error::UnexpectedBufferFull)?;
        // Get the encoded amount, with room for an extra zero terminator
        let res = out_buf
            .get_mut(..used + 1)
            .ok_or(Error::UnexpectedBufferFull)?;
        res[used] = 0;
        Ok(res)
    }

    /// Decodes a [SnoopFrame] from the given buffer
    ///
    /// NOTE: This MAY mutate `data`, even if the decoding fails.
    pub fn decode_from(data: &'a mut [u8]) -> Result<Self, Error> {
        let dec_len = cobs::decode_in_place(data).map_err(|_| Error::CobsDecodeFailed)?;

        // A frame without its dropped-count header is not well formed. An
        // empty symbol run is fine: it is how an otherwise idle sniffer
        // reports drops.
        if dec_len < size_of::<u16>() {
            return Err(Error::MalformedFrame);
        }

        let frame = data.get(..dec_len).ok_or(Error::MalformedFrame)?;

        let mut dropped_bytes = [0u8; size_of::<u16>()];
        let (dropped_data, symbols) = frame.split_at(size_of::<u16>());
        dropped_bytes.copy_from_slice(dropped_data);
        let dropped = u16::from_le_bytes(dropped_bytes);

        Ok(SnoopFrame { dropped, symbols })
    }

    /// Iterate the frame's symbols as [`Token`]s.
    ///
    /// Bytes outside the alphabet decode as `None`; they mean the link (not
    /// the sniffer) corrupted the frame.
    pub fn tokens(&self) -> impl Iterator<Item = Option<Token>> + 'a {
        self.symbols.iter().map(|&sym| Token::from_symbol(sym))
    }

    /// Convert into an [OwnedSnoopFrame]
    ///
    /// Only available with the `use-std` feature active
    #[cfg(feature = "use-std")]
    pub fn into_owned(self) -> OwnedSnoopFrame {
        OwnedSnoopFrame {
            dropped: self.dropped,
            symbols: self.symbols.to_vec(),
        }
    }
}

/// Like [SnoopFrame], but owns the storage instead
///
/// Only available with the `use-std` feature active
#[cfg(feature = "use-std")]
#[derive(Debug, PartialEq)]
pub struct OwnedSnoopFrame {
    pub dropped: u16,
    pub symbols: Vec<u8>,
}

#[cfg(feature = "use-std")]
impl OwnedSnoopFrame {
    /// Decodes an [OwnedSnoopFrame] from the given buffer
    ///
    /// Unlike [SnoopFrame::decode_from], this will not mutate the given buffer.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut data = data.to_vec();
        let frame = SnoopFrame::decode_from(&mut data)?;
        Ok(frame.into_owned())
    }

    /// Borrows self as a [SnoopFrame]
    pub fn as_frame(&self) -> SnoopFrame<'_> {
        SnoopFrame {
            dropped: self.dropped,
            symbols: &self.symbols,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::{prop_assert_eq, proptest};

    #[test]
    fn symbols_are_bijective() {
        for token in Token::ALL {
            assert_eq!(Token::from_symbol(token.symbol()), Some(token));
        }
        // every symbol maps back to exactly one token
        let mut hits = 0;
        for sym in 0..=u8::MAX {
            if let Some(token) = Token::from_symbol(sym) {
                assert_eq!(token.symbol(), sym);
                hits += 1;
            }
        }
        assert_eq!(hits, Token::ALL.len());
    }

    #[test]
    fn len_calc_right() {
        let symbols = *b"S10+";
        let frame = SnoopFrame::new(0, &symbols);
        let reqd = frame.buffer_required();
        assert_eq!(8, reqd);
        let mut buf = [0u8; 8];
        let res = frame.encode_to(&mut buf).unwrap();
        // two zero bytes of dropped count, then the symbol run
        assert_eq!(&[1, 1, 5, b'S', b'1', b'0', b'+', 0], res);
    }

    #[test]
    fn round_trip() {
        let frame = SnoopFrame {
            dropped: 1234,
            symbols: b"S1010000W+s",
        };
        let mut buf = [0u8; 32];
        let enc = frame.encode_to(&mut buf).unwrap();

        let dec = SnoopFrame::decode_from(enc).unwrap();
        assert_eq!(dec.dropped, 1234);
        assert_eq!(dec.symbols, b"S1010000W+s");
        assert!(dec.tokens().all(|t| t.is_some()));
    }

    #[test]
    fn empty_symbol_run_is_valid() {
        // drops happened while nothing was readable
        let frame = SnoopFrame::new(5, &[]);
        let mut buf = [0u8; 8];
        let enc = frame.encode_to(&mut buf).unwrap();
        let dec = SnoopFrame::decode_from(enc).unwrap();
        assert_eq!(dec.dropped, 5);
        assert!(dec.symbols.is_empty());
    }

    #[test]
    fn too_short() {
        // ONLY cobs delim (zero size)
        let mut data = [0];
        assert_eq!(
            SnoopFrame::decode_from(&mut data),
            Err(Error::MalformedFrame)
        );

        // cobs header + delim (zero size)
        let mut data = [1, 0];
        assert_eq!(
            SnoopFrame::decode_from(&mut data),
            Err(Error::MalformedFrame)
        );

        // cobs header + 1 data byte - only half of the dropped count
        let mut data = [2, 1, 0];
        assert_eq!(
            SnoopFrame::decode_from(&mut data),
            Err(Error::MalformedFrame)
        );
    }

    #[test]
    fn bad_cobs() {
        // cobs pointer goes past the end
        let mut data = [100, 2, 3, 0];
        assert_eq!(
            SnoopFrame::decode_from(&mut data),
            Err(Error::CobsDecodeFailed)
        );

        // secondary cobs pointer goes past the end
        let mut data = [2, 2, 2, 0];
        assert_eq!(
            SnoopFrame::decode_from(&mut data),
            Err(Error::CobsDecodeFailed)
        );
    }

    proptest! {
        #[test]
        fn any_symbol_run_round_trips(dropped: u16, raw in proptest::collection::vec(0u8..=255, 0..64)) {
            let frame = SnoopFrame::new(dropped, &raw);
            let mut buf = vec![0u8; frame.buffer_required()];
            let enc = frame.encode_to(&mut buf).unwrap();
            let dec = SnoopFrame::decode_from(enc).unwrap();
            prop_assert_eq!(dec.dropped, dropped);
            prop_assert_eq!(dec.symbols, &raw[..]);
        }
    }
}
