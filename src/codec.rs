//! Fixed-width order wire format: `id(4) symbol(8) side(1) quantity(4) price(8)`.

use std::fmt;

const ID_LEN: usize = 4;
const SYMBOL_LEN: usize = 8;
const SIDE_LEN: usize = 1;
const QUANTITY_LEN: usize = 4;
const PRICE_LEN: usize = 8;
const RECORD_LEN: usize = ID_LEN + SYMBOL_LEN + SIDE_LEN + QUANTITY_LEN + PRICE_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    fn sign(self) -> char {
        match self {
            Side::Buy => '+',
            Side::Sell => '-',
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Message isn't exactly `RECORD_LEN` bytes.
    WrongLength,
    /// A numeric field (quantity or price) contains a non-ASCII-digit byte.
    NonDigit,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::WrongLength => write!(f, "order record has the wrong length"),
            ParseError::NonDigit => write!(f, "order record contains a non-digit numeric field"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses a 25-byte fixed-width order record.
///
/// Numeric fields are parsed strictly: every byte in the quantity and price
/// windows must be an ASCII digit, or the whole record is rejected. This is
/// the hardened behavior pinned by `SPEC_FULL.md`'s redesign of the source's
/// lenient `from_chars`-style parsing.
pub fn parse_order(message: &[u8]) -> Result<Order, ParseError> {
    if message.len() != RECORD_LEN {
        return Err(ParseError::WrongLength);
    }

    let mut offset = 0;
    let id_bytes = &message[offset..offset + ID_LEN];
    offset += ID_LEN;
    let symbol_bytes = &message[offset..offset + SYMBOL_LEN];
    offset += SYMBOL_LEN;
    let side_byte = message[offset];
    offset += SIDE_LEN;
    let quantity_bytes = &message[offset..offset + QUANTITY_LEN];
    offset += QUANTITY_LEN;
    let price_bytes = &message[offset..offset + PRICE_LEN];

    let quantity = parse_digits(quantity_bytes)?;
    let price = parse_digits(price_bytes)? as f64;

    Ok(Order {
        id: String::from_utf8_lossy(id_bytes).into_owned(),
        symbol: String::from_utf8_lossy(symbol_bytes).into_owned(),
        side: if side_byte == b'+' { Side::Buy } else { Side::Sell },
        quantity,
        price,
    })
}

fn parse_digits(bytes: &[u8]) -> Result<u64, ParseError> {
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::NonDigit);
    }
    // `bytes` is ASCII digits only, `std::str::from_utf8` cannot fail.
    std::str::from_utf8(bytes).unwrap().parse().map_err(|_| ParseError::NonDigit)
}

/// Formats an order back into its 25-byte wire record, right-aligning
/// `id`/`symbol` and zero-padding `quantity`/`price`, as used for
/// `listorders` responses.
pub fn format_order(order: &Order) -> String {
    format!(
        "{id:>4}{symbol:>8}{sign}{qty:0>4}{price:0>8.0}\n",
        id = order.id,
        symbol = order.symbol,
        sign = order.side.sign(),
        qty = order.quantity,
        price = order.price,
    )
}
