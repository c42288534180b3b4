/*!
 * Socket Gateway Tests
 * Two activities talking over the loopback network
 */

use crate::common::{addr, addr_mut, err, Harness};
use linux_raw_sys::general::{
    __NR_accept4, __NR_bind, __NR_close, __NR_connect, __NR_getpeername, __NR_getsockname,
    __NR_listen, __NR_read, __NR_recvfrom, __NR_sendto, __NR_socket, __NR_write,
};
use linux_raw_sys::net::{AF_INET, SOCK_DGRAM, SOCK_STREAM};
use posix_shim::abi::layout::{SockAddrIn, SOCK_CLOEXEC};
use posix_shim::native::memory::{LoopbackNet, MemoryRuntime};
use posix_shim::native::Endpoint;
use posix_shim::syscalls::{endpoint_from_sockaddr, read_sockaddr, sockaddr_from_endpoint};
use posix_shim::{Errno, ShimConfig};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::mem::size_of;
use std::net::Ipv4Addr;

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const LEN: usize = size_of::<SockAddrIn>();

fn host(net: &LoopbackNet, id: u32, ip: Ipv4Addr) -> Harness {
    let config = ShimConfig {
        max_fds: 40,
        ..ShimConfig::embedded()
    };
    let rt = MemoryRuntime::on_network(id, config.max_fds, net.clone(), ip);
    Harness::with_runtime(config, rt)
}

fn sockaddr(ip: Ipv4Addr, port: u16) -> SockAddrIn {
    sockaddr_from_endpoint(Endpoint::from((ip, port)))
}

#[test]
fn test_stream_connection_between_two_activities() {
    let net = LoopbackNet::new();
    let mut server = host(&net, 1, SERVER_IP);
    let mut client = host(&net, 2, CLIENT_IP);

    let listener = server.call(__NR_socket, [AF_INET as usize, SOCK_STREAM as usize, 0, 0, 0, 0]);
    assert_eq!(listener, 40);
    let listener = listener as usize;
    let bind_addr = sockaddr(Ipv4Addr::UNSPECIFIED, 8080);
    assert_eq!(server.call(__NR_bind, [listener, addr(&bind_addr), LEN, 0, 0, 0]), 0);
    assert_eq!(server.call(__NR_listen, [listener, 1, 0, 0, 0, 0]), 0);

    let conn = client.call(__NR_socket, [AF_INET as usize, SOCK_STREAM as usize, 0, 0, 0, 0]);
    assert_eq!(conn, 40);
    let conn = conn as usize;
    let target = sockaddr(SERVER_IP, 8080);
    assert_eq!(client.call(__NR_connect, [conn, addr(&target), LEN, 0, 0, 0]), 0);

    let mut peer = SockAddrIn::default();
    let mut peer_len = LEN as u32;
    let accepted = server.call(
        __NR_accept4,
        [listener, addr_mut(&mut peer), addr_mut(&mut peer_len), SOCK_CLOEXEC as usize, 0, 0],
    );
    assert_eq!(accepted, 41);
    let accepted = accepted as usize;
    assert_eq!(endpoint_from_sockaddr(&peer).ip(), CLIENT_IP);
    assert_eq!(peer_len as usize, LEN);

    let msg = b"ping";
    assert_eq!(client.call(__NR_write, [conn, msg.as_ptr() as usize, msg.len(), 0, 0, 0]), 4);
    let mut buf = [0u8; 16];
    let n = server.call(__NR_read, [accepted, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]);
    assert_eq!(&buf[..n as usize], msg);

    // nothing more queued: would block
    let again = server.call(__NR_read, [accepted, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]);
    assert_eq!(again, err(Errno::EAGAIN));

    let mut name = SockAddrIn::default();
    let mut name_len = LEN as u32;
    let getpeer = [conn, addr_mut(&mut name), addr_mut(&mut name_len), 0, 0, 0];
    assert_eq!(client.call(__NR_getpeername, getpeer), 0);
    assert_eq!(endpoint_from_sockaddr(&name), Endpoint::from((SERVER_IP, 8080)));

    let mut short_len = 4u32;
    let getsock = [conn, addr_mut(&mut name), addr_mut(&mut short_len), 0, 0, 0];
    assert_eq!(client.call(__NR_getsockname, getsock), err(Errno::ENOMEM));

    assert_eq!(client.call(__NR_close, [conn, 0, 0, 0, 0, 0]), 0);
    let eof = server.call(__NR_read, [accepted, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]);
    assert_eq!(eof, 0);
}

#[test]
fn test_connect_to_unknown_host_is_refused() {
    let net = LoopbackNet::new();
    let mut client = host(&net, 2, CLIENT_IP);
    let fd = client.call(__NR_socket, [AF_INET as usize, SOCK_STREAM as usize, 0, 0, 0, 0]) as usize;
    let target = sockaddr(Ipv4Addr::new(10, 9, 9, 9), 1);
    assert_eq!(
        client.call(__NR_connect, [fd, addr(&target), LEN, 0, 0, 0]),
        err(Errno::ECONNREFUSED)
    );
    assert_eq!(
        client.call(__NR_connect, [fd, addr(&target), LEN - 1, 0, 0, 0]),
        err(Errno::EINVAL)
    );
}

#[test]
fn test_datagrams_carry_sender() {
    let net = LoopbackNet::new();
    let mut a = host(&net, 1, SERVER_IP);
    let mut b = host(&net, 2, CLIENT_IP);

    let rx = a.call(__NR_socket, [AF_INET as usize, SOCK_DGRAM as usize, 0, 0, 0, 0]) as usize;
    let local = sockaddr(Ipv4Addr::UNSPECIFIED, 5353);
    assert_eq!(a.call(__NR_bind, [rx, addr(&local), LEN, 0, 0, 0]), 0);

    let tx = b.call(__NR_socket, [AF_INET as usize, SOCK_DGRAM as usize, 0, 0, 0, 0]) as usize;
    let dest = sockaddr(SERVER_IP, 5353);
    let payload = b"query";
    let sent = b.call(
        __NR_sendto,
        [tx, payload.as_ptr() as usize, payload.len(), 0, addr(&dest), LEN],
    );
    assert_eq!(sent, 5);

    let mut buf = [0u8; 16];
    let mut from = SockAddrIn::default();
    let mut from_len = LEN as u32;
    let got = a.call(
        __NR_recvfrom,
        [rx, buf.as_mut_ptr() as usize, buf.len(), 0, addr_mut(&mut from), addr_mut(&mut from_len)],
    );
    assert_eq!(&buf[..got as usize], payload);
    assert_eq!(endpoint_from_sockaddr(&from).ip(), CLIENT_IP);

    let empty = a.call(__NR_recvfrom, [rx, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]);
    assert_eq!(empty, err(Errno::EAGAIN));
}

#[test]
fn test_socket_calls_on_plain_file() {
    let mut h = Harness::embedded();
    h.rt.fs.write_file("/f", b"").unwrap();
    let fd = h.shim.open_at(-100, "/f", 0, 0).unwrap() as usize;
    assert_eq!(h.call(__NR_listen, [fd, 1, 0, 0, 0, 0]), err(Errno::ENOTSOCK));
}

proptest! {
    /// sockaddr_in to endpoint and back preserves address and port
    #[test]
    fn prop_sockaddr_round_trip(ip in any::<u32>(), port in any::<u16>()) {
        let ep = Endpoint::new(ip, port);
        let raw = sockaddr_from_endpoint(ep);
        prop_assert_eq!(raw.sin_family as u32, AF_INET);
        prop_assert_eq!(u16::from_be(raw.sin_port), port);
        prop_assert_eq!(endpoint_from_sockaddr(&raw), ep);
        let read = unsafe { read_sockaddr(addr(&raw), LEN) };
        prop_assert_eq!(read, Ok(ep));
    }
}
