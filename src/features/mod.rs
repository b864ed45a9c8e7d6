pub mod capture;
pub mod envelope;
pub mod pdf;
pub mod placement;
pub mod recovery;
pub mod storage;

#[cfg(test)]
pub mod test_support;
