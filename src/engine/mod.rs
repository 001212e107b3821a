pub mod expiry;
pub mod lifecycle;
pub mod sweep;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testutil;
