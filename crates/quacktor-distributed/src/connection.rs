use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use bincode::{deserialize, serialize};
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};

/// Frames above this size are treated as a corrupted stream.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Serializes the body of a frame, refusing bodies the receiving side would reject.
pub fn serialize_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serialize(msg)?;
    frame_len(&body)?;
    Ok(body)
}

fn frame_len(body: &[u8]) -> Result<u32> {
    match u32::try_from(body.len()) {
        Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
        _ => bail!(
            "Frame of {} bytes exceeds the limit of {MAX_FRAME_SIZE} bytes",
            body.len()
        ),
    }
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<InnerConnection>,
}

struct InnerConnection {
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

// Connection implements length-prefix framing and bincode serialization/deserialization of messages
impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Connection {
            inner: Arc::new(InnerConnection {
                peer,
                reader: Mutex::new(read_half),
                writer: Mutex::new(write_half),
            }),
        })
    }

    pub async fn connect(addr: (&str, u16)) -> Result<Self> {
        Self::new(TcpStream::connect(addr).await?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        self.send_frame(&serialize(msg)?).await
    }

    /// Sends a body produced by [`serialize_frame`].
    pub async fn send_frame(&self, body: &[u8]) -> Result<()> {
        let len = frame_len(body)?;
        // Prefix message with size as little-endian u32 value.
        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32_le(len);
        frame.put_slice(body);
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }

    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T> {
        let mut reader = self.inner.reader.lock().await;
        let mut size = [0u8; 4];
        reader.read_exact(&mut size).await?;
        let size = u32::from_le_bytes(size);
        if size > MAX_FRAME_SIZE {
            bail!("Frame of {size} bytes from {} is too large", self.inner.peer);
        }
        let mut buffer = vec![0u8; size as usize];
        reader.read_exact(&mut buffer).await?;
        Ok(deserialize(&buffer)?)
    }

    /// Sends a request and waits for the answer.
    pub async fn request<T: Serialize, R: DeserializeOwned>(&self, msg: &T) -> Result<R> {
        self.send(msg).await?;
        self.receive().await
    }

    /// Resolves once the peer closed the connection or the connection broke.
    ///
    /// Anything the peer sends in the meantime is discarded. This is cancellation safe.
    pub async fn closed(&self) {
        let mut reader = self.inner.reader.lock().await;
        let mut scratch = [0u8; 256];
        loop {
            match reader.read(&mut scratch).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
