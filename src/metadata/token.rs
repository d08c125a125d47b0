use std::fmt;

/// Table tags for the metadata tokens this engine reads or emits.
///
/// The tag occupies the high byte of a [`Token`]; the set here is the subset
/// of ECMA-335 tables the rewrite pass touches.
pub mod table {
    /// `TypeRef` table (II.22.38)
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table (II.22.37)
    pub const TYPE_DEF: u8 = 0x02;
    /// `MethodDef` table (II.22.26)
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table (II.22.25)
    pub const MEMBER_REF: u8 = 0x0A;
    /// `AssemblyRef` table (II.22.5)
    pub const ASSEMBLY_REF: u8 = 0x23;
    /// User string heap (`#US`) references
    pub const USER_STRING: u8 = 0x70;
}

/// A metadata token referencing a metadata table entry.
///
/// A token is a 32-bit value where the high byte names the table and the low
/// 24 bits the row index within it. Row 0 is the null token for that table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table tag and a row index.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table tag from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (row 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_round_trip() {
        let token = Token::from_parts(table::METHOD_DEF, 0x1234);
        assert_eq!(token.value(), 0x0600_1234);
        assert_eq!(token.table(), table::METHOD_DEF);
        assert_eq!(token.row(), 0x1234);
    }

    #[test]
    fn null_is_per_table() {
        assert!(Token::from_parts(table::ASSEMBLY_REF, 0).is_null());
        assert!(!Token::from_parts(table::ASSEMBLY_REF, 1).is_null());
        assert!(Token::new(0).is_null());
    }

    #[test]
    fn row_masks_table() {
        let token = Token::new(0x70FF_FFFF);
        assert_eq!(token.table(), table::USER_STRING);
        assert_eq!(token.row(), 0x00FF_FFFF);
    }

    #[test]
    fn display_hex() {
        assert_eq!(Token::new(0x0A00_0001).to_string(), "0x0a000001");
    }
}
