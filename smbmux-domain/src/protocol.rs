use std::fmt;
use std::ops::BitOr;

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Negotiated SMB dialect, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dialect {
    // ---
    Smb1,
    Smb202,
    Smb210,
    Smb300,
    Smb302,
    Smb311,
}

// ---

impl Dialect {
    // ---
    pub fn is_smb2_or_later(self) -> bool {
        self >= Dialect::Smb202
    }

    /// Multi-channel arrived with SMB 3.0.
    pub fn supports_multi_channel(self) -> bool {
        self >= Dialect::Smb300
    }
}

// ---

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let s = match self {
            Dialect::Smb1 => "SMB1",
            Dialect::Smb202 => "SMB 2.0.2",
            Dialect::Smb210 => "SMB 2.1",
            Dialect::Smb300 => "SMB 3.0",
            Dialect::Smb302 => "SMB 3.0.2",
            Dialect::Smb311 => "SMB 3.1.1",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// SMB2 global capability bits from the NEGOTIATE response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

// ---

impl Capabilities {
    // ---
    pub const DFS: Capabilities = Capabilities(0x0000_0001);
    pub const LEASING: Capabilities = Capabilities(0x0000_0002);
    pub const LARGE_MTU: Capabilities = Capabilities(0x0000_0004);
    pub const MULTI_CHANNEL: Capabilities = Capabilities(0x0000_0008);
    pub const PERSISTENT_HANDLES: Capabilities = Capabilities(0x0000_0010);
    pub const DIRECTORY_LEASING: Capabilities = Capabilities(0x0000_0020);
    pub const ENCRYPTION: Capabilities = Capabilities(0x0000_0040);

    // ---

    pub const fn empty() -> Self {
        Capabilities(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Capabilities(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

// ---

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// FileId
// ---------------------------------------------------------------------------

/// Server-assigned open-file identifier.
///
/// SMB2 uses a 16-byte persistent/volatile pair; SMB1 FIDs are widened
/// into the low two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId([u8; 16]);

// ---

impl FileId {
    // ---
    pub const fn new(bytes: [u8; 16]) -> Self {
        FileId(bytes)
    }

    pub fn from_fid(fid: u16) -> Self {
        // ---
        let mut bytes = [0u8; 16];
        bytes[..2].copy_from_slice(&fid.to_le_bytes());
        FileId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// ---

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OpenedFile
// ---------------------------------------------------------------------------

/// Result of a successful CREATE on a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedFile {
    // ---
    pub file_id: FileId,
    pub end_of_file: u64,
}

// ---
