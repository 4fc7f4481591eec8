//! TCP/UDP socket wrappers, grounded on the teacher's
//! `communication/socket/async_std_tcp/mod.rs` `Listener`/`Socket` shape
//! (bind/connect/accept as free functions plus a thin wrapper struct).
//! Reimplemented against `tokio::net` because `socket_tokio` is Tempest's
//! default feature; the async-std backend is kept as a non-default
//! alternate mirroring the teacher's own multi-backend feature layout.

use std::io;
use std::net::SocketAddr;

#[cfg(feature = "socket_tokio")]
mod tcp_backend {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{TcpListener, TcpStream};

    pub struct Listener {
        inner: TcpListener,
    }

    pub struct TcpSocket {
        inner: TcpStream,
    }

    pub struct TcpReadHalf {
        inner: OwnedReadHalf,
    }

    pub struct TcpWriteHalf {
        inner: OwnedWriteHalf,
    }

    impl TcpReadHalf {
        pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf).await
        }
    }

    impl TcpWriteHalf {
        pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.write_all(buf).await
        }
    }

    pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
        Ok(Listener { inner: TcpListener::bind(addr).await? })
    }

    pub async fn connect(addr: SocketAddr) -> io::Result<TcpSocket> {
        Ok(TcpSocket { inner: TcpStream::connect(addr).await? })
    }

    impl Listener {
        pub async fn accept(&self) -> io::Result<(TcpSocket, SocketAddr)> {
            let (inner, peer) = self.inner.accept().await?;
            Ok((TcpSocket { inner }, peer))
        }

        pub fn local_addr(&self) -> io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    impl TcpSocket {
        pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf).await
        }

        pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.write_all(buf).await
        }

        pub fn peer_addr(&self) -> io::Result<SocketAddr> {
            self.inner.peer_addr()
        }

        pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
            self.inner.set_nodelay(nodelay)
        }

        pub fn split(self) -> (TcpReadHalf, TcpWriteHalf) {
            let (r, w) = self.inner.into_split();
            (TcpReadHalf { inner: r }, TcpWriteHalf { inner: w })
        }
    }
}

#[cfg(all(feature = "socket_async_std", not(feature = "socket_tokio")))]
mod tcp_backend {
    use super::*;
    use async_std::net::{TcpListener, TcpStream};
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    pub struct Listener {
        inner: TcpListener,
    }

    pub struct TcpSocket {
        inner: TcpStream,
    }

    /// async-std's `TcpStream` is a cheap `Arc`-backed clone, so splitting
    /// is just cloning into two handles instead of the owned-half dance
    /// tokio needs.
    pub struct TcpReadHalf {
        inner: TcpStream,
    }

    pub struct TcpWriteHalf {
        inner: TcpStream,
    }

    impl TcpReadHalf {
        pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf).await
        }
    }

    impl TcpWriteHalf {
        pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.write_all(buf).await
        }
    }

    pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
        Ok(Listener { inner: TcpListener::bind(addr).await? })
    }

    pub async fn connect(addr: SocketAddr) -> io::Result<TcpSocket> {
        Ok(TcpSocket { inner: TcpStream::connect(addr).await? })
    }

    impl Listener {
        pub async fn accept(&self) -> io::Result<(TcpSocket, SocketAddr)> {
            let (inner, peer) = self.inner.accept().await?;
            Ok((TcpSocket { inner }, peer))
        }

        pub fn local_addr(&self) -> io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    impl TcpSocket {
        pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf).await
        }

        pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.write_all(buf).await
        }

        pub fn peer_addr(&self) -> io::Result<SocketAddr> {
            self.inner.peer_addr()
        }

        pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
            self.inner.set_nodelay(nodelay)
        }

        pub fn split(self) -> (TcpReadHalf, TcpWriteHalf) {
            let write_half = self.inner.clone();
            (TcpReadHalf { inner: self.inner }, TcpWriteHalf { inner: write_half })
        }
    }
}

pub use tcp_backend::{bind, connect, Listener, TcpReadHalf, TcpSocket, TcpWriteHalf};

/// UDP is always tokio-backed regardless of the TCP socket feature
/// selection: Tempest's UDP reliability layer (C6) runs on `tokio::time`
/// either way.
pub struct UdpSocket {
    inner: tokio::net::UdpSocket,
}

impl UdpSocket {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(UdpSocket { inner: tokio::net::UdpSocket::bind(addr).await? })
    }

    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.inner.connect(addr).await
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, target).await
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
