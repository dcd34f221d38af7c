//! Descriptor grammar for layouts and signatures
//!
//! Recursive descent over the descriptor bytes:
//!
//! ```text
//! i<N> / u<N> / f<N>      signed / unsigned / float scalar of N bits
//! p  /  p:<T>             pointer, optionally typed to addressee T
//! [<T1><T2>...]           struct
//! [<T1>|<T2>...]          union
//! <count><T>              fixed-size array
//! x<N>                    N bits of padding
//! (<args>*)<ret>          function signature, `v` = void return; `*` marks
//!                         the end of the fixed arguments, layouts after it
//!                         are the variadic actuals of one call
//! ><T> / <<T>             big / little endian override on a scalar
//! <T>:<W>b                bitfield of W declared bits in container T
//! <T>(name=...)           annotation suffix (also get= set= ptr=)
//! ```
//!
//! Annotations attach metadata without altering size or classification.

use crate::error::DescriptorError;
use crate::layout::{Annotations, Endianness, Layout};
use crate::signature::FunctionSignature;

/// Parse a single layout descriptor, requiring the whole input to be consumed.
pub fn parse(descriptor: &str) -> Result<Layout, DescriptorError> {
    let mut cur = Cursor::new(descriptor);
    let layout = cur.layout()?;
    cur.expect_end()?;
    Ok(layout)
}

/// Parse a function signature descriptor such as `(i32p)f64` or `(p*)v`.
pub fn parse_signature(descriptor: &str) -> Result<FunctionSignature, DescriptorError> {
    let mut cur = Cursor::new(descriptor);
    let sig = cur.signature()?;
    cur.expect_end()?;
    Ok(sig)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8, expected: &'static str) -> Result<(), DescriptorError> {
        match self.bump() {
            Some(found) if found == b => Ok(()),
            Some(found) => Err(DescriptorError::Unexpected {
                at: self.pos - 1,
                found: found as char,
                expected,
            }),
            None => Err(DescriptorError::UnexpectedEnd {
                at: self.pos,
                expected,
            }),
        }
    }

    fn expect_end(&self) -> Result<(), DescriptorError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(DescriptorError::TrailingInput { at: self.pos })
        }
    }

    /// One or more decimal digits
    fn number(&mut self) -> Result<u64, DescriptorError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(DescriptorError::InvalidNumber { at: start });
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DescriptorError::InvalidNumber { at: start })
    }

    /// A scalar bit width: nonzero and within u32
    fn bits(&mut self) -> Result<u32, DescriptorError> {
        let at = self.pos;
        let n = self.number()?;
        if n == 0 || n > u32::MAX as u64 {
            return Err(DescriptorError::InvalidNumber { at });
        }
        Ok(n as u32)
    }

    fn layout(&mut self) -> Result<Layout, DescriptorError> {
        let base = self.bare_layout()?;
        if base.is_padding() {
            // Padding takes no suffixes
            return Ok(base);
        }
        self.suffixes(base)
    }

    /// A layout without its trailing suffixes. Array elements come through
    /// here so that a suffix after `<count><T>` binds to the sequence, not
    /// to the element.
    fn bare_layout(&mut self) -> Result<Layout, DescriptorError> {
        let at = self.pos;
        let base = match self.peek() {
            Some(b'>') | Some(b'<') => {
                let e = if self.bump() == Some(b'>') {
                    Endianness::Big
                } else {
                    Endianness::Little
                };
                let mut inner = self.layout()?;
                match &mut inner {
                    Layout::Value(v) => v.endianness = e,
                    _ => return Err(DescriptorError::MisplacedEndianness { at }),
                }
                return Ok(inner);
            }
            Some(b'i') => {
                self.pos += 1;
                Layout::int(self.bits()?)
            }
            Some(b'u') => {
                self.pos += 1;
                Layout::unsigned(self.bits()?)
            }
            Some(b'f') => {
                self.pos += 1;
                Layout::float(self.bits()?)
            }
            Some(b'x') => {
                self.pos += 1;
                let at = self.pos;
                let bits = self.number()?;
                if bits == 0 {
                    return Err(DescriptorError::InvalidNumber { at });
                }
                return Ok(Layout::padding(bits));
            }
            Some(b'p') => {
                self.pos += 1;
                if self.eat(b':') {
                    if self.peek() == Some(b'(') {
                        Layout::pointer_to_function(self.signature()?)
                    } else {
                        Layout::pointer_to(self.layout()?)
                    }
                } else {
                    Layout::pointer()
                }
            }
            Some(b'0'..=b'9') => {
                let count = self.number()?;
                let element = self.bare_layout()?;
                Layout::sequence(count, element)
            }
            Some(b'[') => self.group()?,
            Some(found) => {
                return Err(DescriptorError::Unexpected {
                    at,
                    found: found as char,
                    expected: "a layout token",
                })
            }
            None => {
                return Err(DescriptorError::UnexpectedEnd {
                    at,
                    expected: "a layout token",
                })
            }
        };
        Ok(base)
    }

    fn group(&mut self) -> Result<Layout, DescriptorError> {
        self.expect(b'[', "'['")?;
        let mut elements = Vec::new();
        let mut union = false;
        loop {
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(b'|') if elements.len() == 1 || union => {
                    self.pos += 1;
                    union = true;
                    elements.push(self.layout()?);
                }
                Some(_) if elements.is_empty() || !union => {
                    elements.push(self.layout()?);
                }
                Some(found) => {
                    return Err(DescriptorError::Unexpected {
                        at: self.pos,
                        found: found as char,
                        expected: "'|' or ']'",
                    })
                }
                None => {
                    return Err(DescriptorError::UnexpectedEnd {
                        at: self.pos,
                        expected: "']'",
                    })
                }
            }
        }
        Ok(if union {
            Layout::union_of(elements)
        } else {
            Layout::struct_of(elements)
        })
    }

    fn signature(&mut self) -> Result<FunctionSignature, DescriptorError> {
        self.expect(b'(', "'('")?;
        let mut args = Vec::new();
        let mut fixed = None;
        loop {
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(b'*') if fixed.is_none() => {
                    self.pos += 1;
                    fixed = Some(args.len());
                }
                Some(b'*') => {
                    return Err(DescriptorError::Unexpected {
                        at: self.pos,
                        found: '*',
                        expected: "a layout token or ')'",
                    })
                }
                Some(_) => args.push(self.layout()?),
                None => {
                    return Err(DescriptorError::UnexpectedEnd {
                        at: self.pos,
                        expected: "')'",
                    })
                }
            }
        }
        let ret = if self.eat(b'v') {
            None
        } else {
            Some(self.layout()?)
        };
        let sig = FunctionSignature::new(ret, args);
        Ok(match fixed {
            Some(n) => sig.variadic_after(n),
            None => sig,
        })
    }

    /// Bitfield and annotation suffixes after a base layout
    fn suffixes(&mut self, mut layout: Layout) -> Result<Layout, DescriptorError> {
        // `:<W>b` is only meaningful on scalars; record the declared width,
        // classification keeps using the container.
        if matches!(layout, Layout::Value(_)) && self.peek() == Some(b':') {
            self.pos += 1;
            let width = self.number()?;
            self.expect(b'b', "'b' after bitfield width")?;
            layout = layout.with_annotation(Annotations::BITFIELD, width.to_string());
        }
        while self.eat(b'(') {
            let key_start = self.pos;
            while matches!(self.peek(), Some(b) if b != b'=' && b != b')') {
                self.pos += 1;
            }
            let key = std::str::from_utf8(&self.bytes[key_start..self.pos])
                .map_err(|_| DescriptorError::InvalidAnnotation { at: key_start })?
                .to_string();
            self.expect(b'=', "'=' in annotation")?;
            let val_start = self.pos;
            while matches!(self.peek(), Some(b) if b != b')') {
                self.pos += 1;
            }
            let value = std::str::from_utf8(&self.bytes[val_start..self.pos])
                .map_err(|_| DescriptorError::InvalidAnnotation { at: val_start })?
                .to_string();
            self.expect(b')', "')' closing annotation")?;
            if key.is_empty() {
                return Err(DescriptorError::Unexpected {
                    at: key_start,
                    found: '=',
                    expected: "annotation key",
                });
            }
            layout = layout.with_annotation(&key, value);
        }
        Ok(layout)
    }
}
