use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Error::*, Result},
    frame::{decode, encode, Frame},
};

#[derive(Clone, Debug)]
pub struct Framer {
    max_frame_size: u32,
}

impl Framer {
    pub fn new(max_frame_size: u32) -> Framer {
        Framer { max_frame_size }
    }

    pub async fn read_frame<R>(&self, r: R) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let mut r = r;

        let len = r.read_u32().await.map_err(|_| Io)?;
        if len <= self.max_frame_size {
            let buf = {
                let mut buf = BytesMut::with_capacity(self.max_frame_size as usize);
                buf.resize(len as usize, 0);
                r.read_exact(&mut buf).await.map_err(|_| Io)?;
                buf.freeze()
            };

            decode::frame(buf)
        } else {
            Err(BadFrameSize)
        }
    }

    pub async fn write_frame<W>(&self, w: W, frame: Frame) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = {
            let len = frame.size();
            let mut buf = BytesMut::with_capacity(Frame::LENGTH_SIZE + len);
            buf.put_u32(len as u32);
            encode::frame(&mut buf, frame);
            buf.freeze()
        };

        let mut w = w;

        w.write_all(&buf).await.map_err(|_| Io)?;

        Ok(buf.len())
    }
}
