//! Token-to-transaction reassembly.
//!
//! The sniffer ships tokens, one per bus edge; this module folds them back
//! into bytes and transactions for display. Reassembly is forgiving: a
//! capture can begin mid-transaction, a transaction can end without a
//! stop, and a byte can be cut off mid-bit. Whatever arrived is shown.

use std::fmt;

use snoop_proto::Token;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Dir {
    Read,
    Write,
}

/// One completed byte and whether the receiver acked it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TxByte {
    pub value: u8,
    pub acked: bool,
}

impl fmt::Display for TxByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{}",
            self.value,
            if self.acked { '+' } else { '-' }
        )
    }
}

/// One reassembled transaction.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Transaction {
    /// The seven-bit target address, if the address byte completed
    pub address: Option<TxByte>,
    pub direction: Option<Dir>,
    pub data: Vec<TxByte>,
    /// Closed by a stop condition. `false` means the transaction was cut
    /// off - by a stop-less new start, a stuck-bus recovery on the
    /// target, or the end of the capture.
    pub complete: bool,
    /// Count of bits belonging to a byte that never finished
    pub trailing_bits: u8,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S")?;
        if let Some(ref addr) = self.address {
            let dir = match self.direction {
                Some(Dir::Read) => 'R',
                Some(Dir::Write) => 'W',
                None => '?',
            };
            write!(
                f,
                " {:02x}{}{}",
                addr.value,
                dir,
                if addr.acked { '+' } else { '-' }
            )?;
        }
        for byte in &self.data {
            write!(f, " {byte}")?;
        }
        if self.trailing_bits > 0 {
            write!(f, " [{} stray bits]", self.trailing_bits)?;
        }
        write!(f, " {}", if self.complete { 's' } else { '~' })
    }
}

/// Folds a token stream back into [`Transaction`]s.
#[derive(Debug, Default)]
pub struct Assembler {
    open: bool,
    value: u8,
    bits: u8,
    address: Option<TxByte>,
    direction: Option<Dir>,
    data: Vec<TxByte>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one token; returns a transaction whenever one closes.
    pub fn push(&mut self, token: Token) -> Option<Transaction> {
        match token {
            Token::Start => {
                // a start while a transaction is open means the previous
                // one was abandoned without a stop
                let cut_off = self.open.then(|| self.take(false));
                self.open = true;
                cut_off
            }
            Token::Stop => self.open.then(|| self.take(true)),
            _ if !self.open => {
                // capture began mid-transaction; nothing to attach this to
                tracing::debug!(?token, "token outside a transaction, skipped");
                None
            }
            Token::Bit0 | Token::Bit1 => {
                self.value = (self.value << 1) | u8::from(token == Token::Bit1);
                self.bits += 1;
                None
            }
            Token::ReadDir | Token::WriteDir => {
                self.direction = Some(if token == Token::ReadDir {
                    Dir::Read
                } else {
                    Dir::Write
                });
                self.bits += 1;
                None
            }
            Token::Ack | Token::Nack => {
                let byte = TxByte {
                    value: self.value,
                    acked: token == Token::Ack,
                };
                if self.direction.is_some() && self.address.is_none() {
                    self.address = Some(byte);
                } else {
                    self.data.push(byte);
                }
                self.value = 0;
                self.bits = 0;
                None
            }
        }
    }

    /// Flushes a transaction left open at the end of the capture.
    pub fn flush(&mut self) -> Option<Transaction> {
        self.open.then(|| self.take(false))
    }

    fn take(&mut self, complete: bool) -> Transaction {
        let txn = Transaction {
            address: self.address.take(),
            direction: self.direction.take(),
            data: std::mem::take(&mut self.data),
            complete,
            trailing_bits: self.bits,
        };
        self.open = false;
        self.value = 0;
        self.bits = 0;
        txn
    }
}
