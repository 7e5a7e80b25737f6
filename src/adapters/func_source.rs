use async_trait::async_trait;

use super::{AdapterError, BatchSource};
use crate::message::Batch;

/// Batch source backed by a closure. Returning `Ok(None)` ends the source.
pub struct FuncSource<F> {
    read: F,
}

impl<F> FuncSource<F>
where
    F: FnMut() -> Result<Option<Batch>, AdapterError> + Send,
{
    pub fn new(read: F) -> Self {
        Self { read }
    }
}

#[async_trait]
impl<F> BatchSource for FuncSource<F>
where
    F: FnMut() -> Result<Option<Batch>, AdapterError> + Send,
{
    async fn next_batch(&mut self) -> Result<Option<Batch>, AdapterError> {
        (self.read)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_func_source() {
        let mut source = FuncSource::new(|| Ok(Some(Batch::from_payloads(["foo", "bar"]))));

        let batch = source.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.to_strings(), vec!["foo", "bar"]);
    }

    #[tokio::test]
    async fn test_func_source_error() {
        let mut source = FuncSource::new(|| Err(AdapterError::Source("test err".to_string())));

        let err = source.next_batch().await.unwrap_err();
        assert_eq!(err, AdapterError::Source("test err".to_string()));
    }

    #[test]
    fn test_func_source_exhausted() {
        let mut remaining = vec![Batch::from_payloads(["last"])];
        let mut source = FuncSource::new(move || Ok(remaining.pop()));

        let first = tokio_test::block_on(source.next_batch());
        assert!(tokio_test::assert_ok!(first).is_some());
        let second = tokio_test::block_on(source.next_batch());
        assert!(tokio_test::assert_ok!(second).is_none());
    }
}
