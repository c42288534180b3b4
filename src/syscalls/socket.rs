/*!
 * Socket Gateway
 *
 * BSD sockets over native stream and datagram sockets. IPv4 only.
 *
 * Native stream sockets bind and listen in one step, so `bind` on a stream
 * socket only remembers the port and `accept` does the rest: it creates a
 * fresh socket, listens on the remembered port and blocks for a peer.
 */

use linux_raw_sys::net::{AF_INET, SOCK_DGRAM, SOCK_STREAM};
use std::mem::size_of;
use tracing::{debug, warn};

use super::descriptors::Descriptor;
use super::fs::progress;
use super::Dispatcher;
use crate::abi::errno::Errno;
use crate::abi::layout::{IoVec, MsgHdr, SockAddrIn, SHUT_RDWR, SOCK_CLOEXEC, SOCK_NONBLOCK};
use crate::abi::user;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;
use crate::native::{
    DatagramSocket, Endpoint, NativeError, NetConnector, NetworkManager, StreamSocket,
};

// =============================================================================
// ADDRESS TRANSLATION
// =============================================================================

const SOCKADDR_IN_LEN: usize = size_of::<SockAddrIn>();

/// `sockaddr_in` to endpoint; anything but `AF_INET` is unspecified
pub fn endpoint_from_sockaddr(raw: &SockAddrIn) -> Endpoint {
    if raw.sin_family as u32 != AF_INET as u32 {
        return Endpoint::unspecified();
    }
    Endpoint::new(u32::from_be(raw.sin_addr), u16::from_be(raw.sin_port))
}

pub fn sockaddr_from_endpoint(ep: Endpoint) -> SockAddrIn {
    SockAddrIn {
        sin_family: AF_INET as u16,
        sin_port: ep.port.to_be(),
        sin_addr: ep.addr.to_be(),
        sin_zero: [0; 8],
    }
}

/// Read a caller-supplied address
///
/// A length other than `sizeof(struct sockaddr_in)` yields the unspecified
/// endpoint without touching the buffer.
///
/// # Safety
/// With a matching length, `addr` must point to a readable `sockaddr_in`.
pub unsafe fn read_sockaddr(addr: usize, len: usize) -> SyscallResult<Endpoint> {
    if len != SOCKADDR_IN_LEN {
        return Ok(Endpoint::unspecified());
    }
    let raw = user::read::<SockAddrIn>(addr)?;
    Ok(endpoint_from_sockaddr(&raw))
}

/// Store `ep` into the caller's address buffer and update its length
///
/// Nothing is written when `addr` is null.
///
/// # Safety
/// Non-null `addr` and `len_ptr` must be valid for writes.
pub unsafe fn write_sockaddr(addr: usize, len_ptr: usize, ep: Endpoint) -> SyscallResult<()> {
    if addr == 0 {
        return Ok(());
    }
    let len = user::read::<u32>(len_ptr)? as usize;
    if len < SOCKADDR_IN_LEN {
        return Err(SyscallError::AddressTooSmall {
            len,
            need: SOCKADDR_IN_LEN,
        });
    }
    user::write(addr, sockaddr_from_endpoint(ep))?;
    user::write(len_ptr, SOCKADDR_IN_LEN as u32)
}

// =============================================================================
// STATE
// =============================================================================

/// Lazily opened session with the network service
pub struct NetSession {
    connector: Option<Box<dyn NetConnector>>,
    manager: Option<Box<dyn NetworkManager>>,
}

impl NetSession {
    pub fn new(connector: Option<Box<dyn NetConnector>>) -> Self {
        Self {
            connector,
            manager: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.manager.is_some()
    }

    fn manager(&mut self, service: &str) -> SyscallResult<&mut Box<dyn NetworkManager>> {
        if self.manager.is_none() {
            let connector = self
                .connector
                .as_mut()
                .ok_or(SyscallError::Unsupported("no network service configured"))?;
            let manager = connector.connect(service)?;
            debug!(service, "network session opened");
            self.manager = Some(manager);
        }
        self.manager
            .as_mut()
            .ok_or(SyscallError::Native(NativeError::NotConnected))
    }
}

pub enum SocketHandle {
    Stream(Box<dyn StreamSocket>),
    Datagram(Box<dyn DatagramSocket>),
}

/// One entry of the socket table
pub struct OpenSocket {
    /// Port remembered by `bind` for the listen step inside `accept`
    pub listen_port: Option<u16>,
    pub handle: SocketHandle,
}

impl OpenSocket {
    fn stream(&mut self) -> SyscallResult<&mut Box<dyn StreamSocket>> {
        match &mut self.handle {
            SocketHandle::Stream(s) => Ok(s),
            SocketHandle::Datagram(_) => Err(SyscallError::Unsupported("datagram socket")),
        }
    }

    fn local_endpoint(&self) -> SyscallResult<Endpoint> {
        Ok(match &self.handle {
            SocketHandle::Stream(s) => s.local_endpoint()?,
            SocketHandle::Datagram(d) => d.local_endpoint()?,
        })
    }

    fn remote_endpoint(&self) -> SyscallResult<Endpoint> {
        Ok(match &self.handle {
            SocketHandle::Stream(s) => s.remote_endpoint()?,
            SocketHandle::Datagram(d) => d.remote_endpoint()?,
        })
    }

    fn send(&mut self, data: &[u8]) -> SyscallResult<Option<usize>> {
        Ok(match &mut self.handle {
            SocketHandle::Stream(s) => s.send(data)?,
            SocketHandle::Datagram(d) => d.send(data)?,
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> SyscallResult<Option<usize>> {
        Ok(match &mut self.handle {
            SocketHandle::Stream(s) => s.recv(buf)?,
            SocketHandle::Datagram(d) => d.recv(buf)?,
        })
    }
}

fn check_msg_shape(msg: &MsgHdr, flags: u32) -> SyscallResult<()> {
    if msg.msg_control != 0 || msg.msg_name != 0 || flags != 0 || msg.msg_iovlen != 1 {
        return Err(SyscallError::Unsupported("message shape"));
    }
    Ok(())
}

// =============================================================================
// GATEWAY
// =============================================================================

impl Dispatcher {
    /// Install an already opened network session
    pub fn set_network_manager(&mut self, manager: Box<dyn NetworkManager>) {
        self.net.manager = Some(manager);
    }

    fn socket_slot(&self, fd: Fd) -> SyscallResult<usize> {
        match self.descriptor(fd)? {
            Descriptor::Socket(slot) => Ok(slot),
            _ => Err(Errno::ENOTSOCK.into()),
        }
    }

    fn open_socket(&mut self, fd: Fd) -> SyscallResult<&mut OpenSocket> {
        let slot = self.socket_slot(fd)?;
        self.sockets
            .get_mut(slot)
            .ok_or(SyscallError::BadDescriptor(fd))
    }

    pub(super) fn socket_send(&mut self, slot: usize, data: &[u8]) -> SyscallResult<Option<usize>> {
        match self.sockets.get_mut(slot) {
            Some(sock) => sock.send(data),
            None => Err(SyscallError::BadDescriptor(self.layout.socket_fd(slot))),
        }
    }

    pub(super) fn socket_recv(&mut self, slot: usize, buf: &mut [u8]) -> SyscallResult<Option<usize>> {
        match self.sockets.get_mut(slot) {
            Some(sock) => sock.recv(buf),
            None => Err(SyscallError::BadDescriptor(self.layout.socket_fd(slot))),
        }
    }

    pub(super) fn close_socket(&mut self, slot: usize) {
        if self.sockets.remove(slot).is_some() {
            debug!(fd = self.layout.socket_fd(slot), "socket closed");
        }
    }

    /// Create a socket; `SOCK_CLOEXEC` and `SOCK_NONBLOCK` are ignored
    pub fn socket(&mut self, domain: u32, ty: u32, _protocol: u32) -> SyscallResult<Fd> {
        if domain != AF_INET as u32 {
            return Err(SyscallError::Unsupported("address family"));
        }
        let stream = match ty & !(SOCK_CLOEXEC | SOCK_NONBLOCK) {
            t if t == SOCK_STREAM as u32 => true,
            t if t == SOCK_DGRAM as u32 => false,
            _ => return Err(Errno::EPROTONOSUPPORT.into()),
        };
        if self.sockets.len() == self.sockets.capacity() {
            return Err(SyscallError::descriptors_exhausted("socket"));
        }

        let manager = self.net.manager(&self.config.net_service)?;
        let handle = if stream {
            SocketHandle::Stream(manager.create_stream()?)
        } else {
            SocketHandle::Datagram(manager.create_datagram()?)
        };
        let slot = self
            .sockets
            .insert(OpenSocket {
                listen_port: None,
                handle,
            })
            .map_err(|_| SyscallError::descriptors_exhausted("socket"))?;

        let fd = self.layout.socket_fd(slot);
        debug!(fd, stream, "socket created");
        Ok(fd)
    }

    pub fn bind(&mut self, fd: Fd, local: Endpoint) -> SyscallResult<()> {
        if local.is_unspecified() {
            return Err(SyscallError::InvalidArgument("unspecified address"));
        }
        let slot = self.socket_slot(fd)?;
        let taken = self.sockets.iter().any(|(idx, other)| {
            idx != slot
                && matches!(other.handle, SocketHandle::Stream(_))
                && other.listen_port == Some(local.port)
        });

        let sock = self
            .sockets
            .get_mut(slot)
            .ok_or(SyscallError::BadDescriptor(fd))?;
        match &mut sock.handle {
            SocketHandle::Stream(_) if taken => Err(Errno::EADDRINUSE.into()),
            SocketHandle::Stream(_) => {
                sock.listen_port = Some(local.port);
                Ok(())
            }
            SocketHandle::Datagram(d) => Ok(d.bind(local.port)?),
        }
    }

    /// Stream sockets start listening inside `accept`; nothing to do here
    pub fn listen(&mut self, fd: Fd) -> SyscallResult<()> {
        match self.open_socket(fd)?.handle {
            SocketHandle::Stream(_) => Ok(()),
            SocketHandle::Datagram(_) => Err(SyscallError::Unsupported("listen on datagram socket")),
        }
    }

    /// Accept one connection; returns the new descriptor and the peer
    ///
    /// The new descriptor is released again if anything after its creation
    /// fails.
    pub fn accept(&mut self, fd: Fd, flags: u32) -> SyscallResult<(Fd, Endpoint)> {
        if flags & !(SOCK_CLOEXEC | SOCK_NONBLOCK) != 0 {
            return Err(SyscallError::InvalidArgument("accept4 flags"));
        }
        let listener = self.open_socket(fd)?;
        listener.stream()?;
        let port = listener
            .listen_port
            .ok_or(SyscallError::InvalidArgument("accept on unbound socket"))?;

        let new_fd = self.socket(AF_INET as u32, SOCK_STREAM as u32, 0)?;
        let new_slot = self.socket_slot(new_fd)?;
        match self.listen_and_accept(new_slot, port) {
            Ok(peer) => {
                debug!(fd, new_fd, %peer, "accepted");
                Ok((new_fd, peer))
            }
            Err(err) => {
                self.close_socket(new_slot);
                Err(err)
            }
        }
    }

    fn listen_and_accept(&mut self, slot: usize, port: u16) -> SyscallResult<Endpoint> {
        let sock = self
            .sockets
            .get_mut(slot)
            .ok_or(SyscallError::BadDescriptor(self.layout.socket_fd(slot)))?
            .stream()?;
        sock.listen(port)?;
        Ok(sock.accept()?)
    }

    /// `accept` plus writing the peer into the caller's buffer
    ///
    /// # Safety
    /// Non-null `addr`/`len_ptr` must be valid for writes.
    pub unsafe fn accept_into(
        &mut self,
        fd: Fd,
        addr: usize,
        len_ptr: usize,
        flags: u32,
    ) -> SyscallResult<Fd> {
        let (new_fd, peer) = self.accept(fd, flags)?;
        if let Err(err) = write_sockaddr(addr, len_ptr, peer) {
            let _ = self.close(new_fd);
            return Err(err);
        }
        Ok(new_fd)
    }

    pub fn connect(&mut self, fd: Fd, remote: Endpoint) -> SyscallResult<()> {
        if remote.is_unspecified() {
            return Err(SyscallError::InvalidArgument("unspecified address"));
        }
        match &mut self.open_socket(fd)?.handle {
            SocketHandle::Stream(s) => Ok(s.connect(remote)?),
            SocketHandle::Datagram(d) => Ok(d.connect(remote)?),
        }
    }

    /// Send on a socket; without a destination this is a plain write
    ///
    /// Streams ignore the destination, datagrams require a specified one.
    pub fn send_to(
        &mut self,
        fd: Fd,
        data: &[u8],
        flags: u32,
        dest: Option<Endpoint>,
    ) -> SyscallResult<usize> {
        if flags != 0 {
            return Err(SyscallError::Unsupported("send flags"));
        }
        let slot = self.socket_slot(fd)?;
        let dest = match dest {
            Some(dest) => dest,
            None => return progress(self.socket_send(slot, data)?),
        };
        let sent = match &mut self.open_socket(fd)?.handle {
            SocketHandle::Stream(s) => s.send(data)?,
            SocketHandle::Datagram(_) if dest.is_unspecified() => {
                return Err(SyscallError::InvalidArgument("unspecified destination"))
            }
            SocketHandle::Datagram(d) => d.send_to(data, dest)?,
        };
        progress(sent)
    }

    /// Receive on a socket, optionally reporting the sender
    pub fn recv_from(
        &mut self,
        fd: Fd,
        buf: &mut [u8],
        flags: u32,
        want_source: bool,
    ) -> SyscallResult<(usize, Option<Endpoint>)> {
        if flags != 0 {
            return Err(SyscallError::Unsupported("recv flags"));
        }
        let slot = self.socket_slot(fd)?;
        if !want_source {
            let n = progress(self.socket_recv(slot, buf)?)?;
            return Ok((n, None));
        }
        match &mut self.open_socket(fd)?.handle {
            SocketHandle::Stream(s) => {
                let n = progress(s.recv(buf)?)?;
                Ok((n, Some(s.remote_endpoint()?)))
            }
            SocketHandle::Datagram(d) => {
                let (n, from) = d.recv_from(buf)?.ok_or(SyscallError::WouldBlock)?;
                Ok((n, Some(from)))
            }
        }
    }

    /// # Safety
    /// Non-null `addr`/`len_ptr` must be valid for writes.
    pub unsafe fn recv_from_into(
        &mut self,
        fd: Fd,
        buf: &mut [u8],
        flags: u32,
        addr: usize,
        len_ptr: usize,
    ) -> SyscallResult<usize> {
        let (n, source) = self.recv_from(fd, buf, flags, addr != 0)?;
        if let Some(source) = source {
            write_sockaddr(addr, len_ptr, source)?;
        }
        Ok(n)
    }

    /// Single-segment `sendmsg` without name or control data
    ///
    /// # Safety
    /// `msg` must point to a readable `msghdr` whose iovec is readable.
    pub unsafe fn sendmsg(&mut self, fd: Fd, msg: usize, flags: u32) -> SyscallResult<usize> {
        let hdr = user::read::<MsgHdr>(msg)?;
        if let Err(err) = check_msg_shape(&hdr, flags) {
            warn!(fd, ?hdr, "sendmsg rejected");
            return Err(err);
        }
        let iov = user::read::<IoVec>(hdr.msg_iov)?;
        let slot = self.socket_slot(fd)?;
        progress(self.socket_send(slot, user::slice(iov.iov_base, iov.iov_len)?)?)
    }

    /// Single-segment `recvmsg` without name or control data
    ///
    /// # Safety
    /// `msg` must point to a writable `msghdr` whose iovec is writable.
    pub unsafe fn recvmsg(&mut self, fd: Fd, msg: usize, flags: u32) -> SyscallResult<usize> {
        let mut hdr = user::read::<MsgHdr>(msg)?;
        if let Err(err) = check_msg_shape(&hdr, flags) {
            warn!(fd, ?hdr, "recvmsg rejected");
            return Err(err);
        }
        let iov = user::read::<IoVec>(hdr.msg_iov)?;
        let slot = self.socket_slot(fd)?;
        let n = progress(self.socket_recv(slot, user::slice_mut(iov.iov_base, iov.iov_len)?)?)?;
        hdr.msg_flags = 0;
        user::write(msg, hdr)?;
        Ok(n)
    }

    /// Only `SHUT_RDWR`; aborts stream connections
    pub fn shutdown(&mut self, fd: Fd, how: u32) -> SyscallResult<()> {
        if how != SHUT_RDWR {
            return Err(SyscallError::Unsupported("partial shutdown"));
        }
        match &mut self.open_socket(fd)?.handle {
            SocketHandle::Stream(s) => Ok(s.abort()?),
            SocketHandle::Datagram(_) => Ok(()),
        }
    }

    pub fn local_name(&mut self, fd: Fd) -> SyscallResult<Endpoint> {
        self.open_socket(fd)?.local_endpoint()
    }

    pub fn peer_name(&mut self, fd: Fd) -> SyscallResult<Endpoint> {
        self.open_socket(fd)?.remote_endpoint()
    }
}
