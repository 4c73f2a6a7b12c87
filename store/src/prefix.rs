//! Entity key prefixes. Every stored key is `prefix byte ++ entity id`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Prefix {
    Block = 0x01,
    Transaction = 0x02,
    Account = 0x40,
    UnspentCoin = 0x44,
    SpentCoin = 0x45,
    Validator = 0x48,
    Asset = 0x4c,
    Contract = 0x50,
    Storage = 0x70,
    HeaderHashList = 0x80,
    CurrentBlock = 0xc0,
    CurrentHeader = 0xc1,
}

impl Prefix {
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Full store key for an encoded entity id.
    pub fn key(self, id: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + id.len());
        key.push(self.byte());
        key.extend_from_slice(id);
        key
    }
}
