//! Async row streams returned by the streaming loaders.

use crate::error::{ArtifactError, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Pull-based source of rows behind a [`RowStream`].
#[async_trait]
pub trait RowReader: Send {
    type Row: Send;

    /// Next row, or `None` once every source is exhausted.
    async fn next_row(&mut self) -> Result<Option<Self::Row>>;
}

/// A finite stream of decoded rows.
///
/// The stream ends after the first error. Dropping it or calling
/// [`RowStream::close`] releases the underlying reader.
pub struct RowStream<T> {
    inner: Option<BoxStream<'static, Result<T>>>,
}

impl<T: Send + 'static> RowStream<T> {
    /// Wrap a [`RowReader`].
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: RowReader<Row = T> + 'static,
    {
        let stream = futures::stream::try_unfold(reader, |mut reader| async move {
            let row = reader.next_row().await?;
            Ok::<_, ArtifactError>(row.map(|row| (row, reader)))
        });
        Self {
            inner: Some(stream.boxed()),
        }
    }

    /// Stream rows that are already in memory.
    pub fn from_rows(rows: Vec<T>) -> Self {
        Self {
            inner: Some(futures::stream::iter(rows.into_iter().map(Ok)).boxed()),
        }
    }

    /// Next row, `Ok(None)` at the end.
    pub async fn next_row(&mut self) -> Result<Option<T>> {
        match self.next().await {
            Some(row) => row.map(Some),
            None => Ok(None),
        }
    }

    /// Drain the remaining rows.
    pub async fn try_collect_rows(mut self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Convert each row, ending the stream on the first conversion error.
    pub fn map_rows<U, F>(self, mut f: F) -> RowStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        RowStream {
            inner: self
                .inner
                .map(|inner| inner.map(move |row| row.and_then(&mut f)).boxed()),
        }
    }

    /// Stop reading. Later calls yield no rows.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<T> Stream for RowStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        next: u32,
        fail_at: Option<u32>,
        end: u32,
    }

    #[async_trait]
    impl RowReader for Counter {
        type Row = u32;

        async fn next_row(&mut self) -> Result<Option<u32>> {
            if Some(self.next) == self.fail_at {
                return Err(ArtifactError::Corrupt("boom".to_string()));
            }
            if self.next >= self.end {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next - 1))
        }
    }

    #[tokio::test]
    async fn test_reader_stream() {
        let stream = RowStream::from_reader(Counter {
            next: 0,
            fail_at: None,
            end: 4,
        });
        assert_eq!(stream.try_collect_rows().await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let mut stream = RowStream::from_reader(Counter {
            next: 0,
            fail_at: Some(2),
            end: 10,
        });
        assert_eq!(stream.next_row().await.unwrap(), Some(0));
        assert_eq!(stream.next_row().await.unwrap(), Some(1));
        assert!(stream.next_row().await.is_err());
        assert!(stream.is_closed());
        assert_eq!(stream.next_row().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_map_rows_and_close() {
        let mut stream = RowStream::from_rows(vec![1u32, 2, 3]).map_rows(|v| {
            if v == 2 {
                Err(ArtifactError::Invalid("two".to_string()))
            } else {
                Ok(v * 10)
            }
        });
        assert_eq!(stream.next_row().await.unwrap(), Some(10));
        assert!(stream.next_row().await.is_err());
        assert_eq!(stream.next_row().await.unwrap(), None);

        let mut stream = RowStream::from_rows(vec![1u32, 2]);
        stream.close();
        assert_eq!(stream.next_row().await.unwrap(), None);
    }
}
