//! LZO1X block decompression, as used by LZO-compressed SquashFS archives.
//!
//! The stream is a sequence of instructions, each either a literal run or a back-reference into
//! the output produced so far. The low two bits of the byte preceding a match's last distance
//! byte carry the number of trailing literals (0-3) that follow the match.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum LzoError {
    InputOverrun,
    OutputOverrun,
    LookBehindOverrun,
}

impl fmt::Display for LzoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LzoError::InputOverrun => write!(f, "lzo: input overrun"),
            LzoError::OutputOverrun => write!(f, "lzo: output exceeds limit"),
            LzoError::LookBehindOverrun => write!(f, "lzo: match distance before start of output"),
        }
    }
}

impl std::error::Error for LzoError {}

const M2_MAX_OFFSET: usize = 0x0800;

enum State {
    // Expecting an instruction that may start a literal run
    Literal,
    // Just copied a literal run of 4 or more bytes
    AfterLiteral,
    Match(usize),
    // Copy 1-3 trailing literals, then read the next match instruction
    MatchNext(usize),
}

struct Decoder<'a> {
    input: &'a [u8],
    ip: usize,
    out: Vec<u8>,
    max: usize,
}

impl<'a> Decoder<'a> {
    fn byte(&mut self) -> Result<usize, LzoError> {
        let b = *self.input.get(self.ip).ok_or(LzoError::InputOverrun)?;
        self.ip += 1;
        Ok(b as usize)
    }

    // Run lengths of zero are extended by following bytes: each zero byte adds 255, the first
    // non-zero byte is added along with `base`.
    fn extended_len(&mut self, base: usize) -> Result<usize, LzoError> {
        let mut t = 0;
        loop {
            let b = self.byte()?;
            if b != 0 {
                return Ok(t + base + b);
            }
            t += 255;
        }
    }

    fn le16_distance(&mut self) -> Result<usize, LzoError> {
        let lo = self.byte()?;
        let hi = self.byte()?;
        Ok((lo >> 2) + (hi << 6))
    }

    fn copy_literals(&mut self, n: usize) -> Result<(), LzoError> {
        let end = self.ip.checked_add(n).ok_or(LzoError::InputOverrun)?;
        let lit = self.input.get(self.ip..end).ok_or(LzoError::InputOverrun)?;
        if self.out.len() + n > self.max {
            return Err(LzoError::OutputOverrun);
        }
        self.out.extend_from_slice(lit);
        self.ip = end;
        Ok(())
    }

    // Matches may overlap their own output, so the copy goes byte by byte
    fn copy_match(&mut self, distance: usize, len: usize) -> Result<(), LzoError> {
        if distance == 0 || distance > self.out.len() {
            return Err(LzoError::LookBehindOverrun);
        }
        if self.out.len() + len > self.max {
            return Err(LzoError::OutputOverrun);
        }
        let start = self.out.len() - distance;
        for i in 0..len {
            let b = self.out[start + i];
            self.out.push(b);
        }
        Ok(())
    }

    fn trailing_literals(&self) -> usize {
        self.input[self.ip - 2] as usize & 3
    }
}

/// Decompress an LZO1X stream producing at most `max` bytes.
pub fn decompress(input: &[u8], max: usize) -> Result<Vec<u8>, LzoError> {
    let mut d = Decoder { input, ip: 0, out: Vec::with_capacity(max), max };

    let first = *input.first().ok_or(LzoError::InputOverrun)? as usize;
    let mut state = if first > 17 {
        d.ip = 1;
        let t = first - 17;
        if t < 4 {
            State::MatchNext(t)
        } else {
            d.copy_literals(t)?;
            State::AfterLiteral
        }
    } else {
        State::Literal
    };

    loop {
        state = match state {
            State::Literal => {
                let t = d.byte()?;
                if t >= 16 {
                    State::Match(t)
                } else {
                    let len = if t == 0 { d.extended_len(15)? } else { t };
                    d.copy_literals(len + 3)?;
                    State::AfterLiteral
                }
            },
            State::AfterLiteral => {
                let t = d.byte()?;
                if t >= 16 {
                    State::Match(t)
                } else {
                    let distance = 1 + M2_MAX_OFFSET + (t >> 2) + (d.byte()? << 2);
                    d.copy_match(distance, 3)?;
                    match d.trailing_literals() {
                        0 => State::Literal,
                        n => State::MatchNext(n),
                    }
                }
            },
            State::Match(t) => {
                if t >= 64 {
                    let distance = 1 + ((t >> 2) & 7) + (d.byte()? << 3);
                    d.copy_match(distance, (t >> 5) + 1)?;
                } else if t >= 32 {
                    let len = match t & 31 {
                        0 => d.extended_len(31)?,
                        n => n,
                    };
                    let distance = 1 + d.le16_distance()?;
                    d.copy_match(distance, len + 2)?;
                } else if t >= 16 {
                    let high = (t & 8) << 11;
                    let len = match t & 7 {
                        0 => d.extended_len(7)?,
                        n => n,
                    };
                    let distance = high + d.le16_distance()?;
                    if distance == 0 {
                        // End of stream marker
                        return Ok(d.out);
                    }
                    d.copy_match(distance + 0x4000, len + 2)?;
                } else {
                    let distance = 1 + (t >> 2) + (d.byte()? << 2);
                    d.copy_match(distance, 2)?;
                }
                match d.trailing_literals() {
                    0 => State::Literal,
                    n => State::MatchNext(n),
                }
            },
            State::MatchNext(n) => {
                d.copy_literals(n)?;
                State::Match(d.byte()?)
            },
        };
    }
}
