use std::fmt;

/// Outcome of submitting a block or transaction to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerifyResult {
    Succeed,
    AlreadyExists,
    /// The memory pool is full and the transaction does not outrank its
    /// lowest entry. Transient.
    OutOfMemory,
    /// The item cannot be checked yet, e.g. a block whose parent is unknown.
    UnableToVerify,
    Invalid,
    /// Valid but refused by local fee policy.
    PolicyFail,
}

impl VerifyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerifyResult::Succeed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyResult::Succeed => "succeed",
            VerifyResult::AlreadyExists => "already_exists",
            VerifyResult::OutOfMemory => "out_of_memory",
            VerifyResult::UnableToVerify => "unable_to_verify",
            VerifyResult::Invalid => "invalid",
            VerifyResult::PolicyFail => "policy_fail",
        }
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
