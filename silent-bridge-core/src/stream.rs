//! 读写流类型

use crate::error::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};

/// `createReadStream` 返回的字节流
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// 由完整内容构造单块字节流
pub fn once_stream(data: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(data) }))
}

/// `createWriteStream` 返回的写入端
///
/// 数据在 `finish` 成功返回后才保证落到后端。
#[async_trait]
pub trait WriteSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    async fn finish(self: Box<Self>) -> Result<()>;
}

type Upload = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, Result<()>> + Send>;

/// 先缓冲、`finish` 时一次性上传的写入端
///
/// 上传闭包只能捕获会话切片的快照，不能借用会话本身。
pub struct BufferedSink {
    buffer: BytesMut,
    upload: Upload,
}

impl BufferedSink {
    pub fn new<F>(upload: F) -> Self
    where
        F: FnOnce(Bytes) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        Self {
            buffer: BytesMut::new(),
            upload: Box::new(upload),
        }
    }
}

#[async_trait]
impl WriteSink for BufferedSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let BufferedSink { buffer, upload } = *self;
        upload(buffer.freeze()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, StreamExt};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_buffered_sink_uploads_on_finish() {
        let uploaded = Arc::new(Mutex::new(None));
        let target = uploaded.clone();
        let mut sink: Box<dyn WriteSink> = Box::new(BufferedSink::new(move |data| {
            async move {
                *target.lock().unwrap() = Some(data);
                Ok(())
            }
            .boxed()
        }));

        sink.write(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write(Bytes::from_static(b"world")).await.unwrap();
        assert!(uploaded.lock().unwrap().is_none());

        sink.finish().await.unwrap();
        assert_eq!(
            uploaded.lock().unwrap().as_deref(),
            Some(&b"hello world"[..])
        );
    }

    #[tokio::test]
    async fn test_once_stream() {
        let chunks: Vec<_> = once_stream(Bytes::from_static(b"abc")).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"abc");
    }
}
