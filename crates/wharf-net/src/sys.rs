//! Thin wrappers over the raw socket layer. Everything unsafe lives here.

use std::{
    io, mem,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
    os::fd::RawFd,
    ptr,
    time::Duration,
};

pub(crate) const INVALID_FD: RawFd = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub(crate) fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::Ipv4,
            SocketAddr::V6(_) => Self::Ipv6,
        }
    }

    fn raw(self) -> libc::c_int {
        match self {
            Self::Ipv4 => libc::AF_INET,
            Self::Ipv6 => libc::AF_INET6,
        }
    }
}

pub(crate) fn tcp_socket(family: AddressFamily) -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(family.raw(), libc::SOCK_STREAM, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Open and immediately close a datagram socket to see whether the host
/// supports `family` at all.
pub(crate) fn datagram_probe(family: AddressFamily) -> bool {
    let fd = unsafe { libc::socket(family.raw(), libc::SOCK_DGRAM, libc::IPPROTO_UDP) };
    if fd < 0 {
        return false;
    }
    close_fd(fd);
    true
}

pub(crate) fn close_fd(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
        libc::close(fd);
    }
}

pub(crate) fn set_blocking(fd: RawFd, blocking: bool) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return;
        }
        let flags =
            if blocking { flags & !libc::O_NONBLOCK } else { flags | libc::O_NONBLOCK };
        libc::fcntl(fd, libc::F_SETFL, flags);
    }
}

/// Bytes the kernel has buffered for `fd`. `None` when the descriptor is
/// invalid or gone and nothing is pending.
pub(crate) fn available(fd: RawFd) -> Option<usize> {
    if fd == INVALID_FD {
        return None;
    }
    let mut pending: libc::c_int = 0;
    let closed = unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut pending) } < 0;
    if pending == 0 && closed {
        return None;
    }
    Some(pending.max(0) as usize)
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Readiness {
    pub(crate) ready: bool,
    pub(crate) error: bool,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Interest {
    Read,
    Write,
}

/// Wait for `fd` to become ready or report an exceptional condition, up to
/// `timeout`. `None` polls without waiting.
pub(crate) fn select_fd(
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
) -> io::Result<Readiness> {
    unsafe {
        let mut ready_set: libc::fd_set = mem::zeroed();
        let mut error_set: libc::fd_set = mem::zeroed();
        libc::FD_ZERO(&mut ready_set);
        libc::FD_ZERO(&mut error_set);
        libc::FD_SET(fd, &mut ready_set);
        libc::FD_SET(fd, &mut error_set);

        let limit = timeout.unwrap_or(Duration::ZERO);
        let mut tv = libc::timeval {
            tv_sec: limit.as_secs() as libc::time_t,
            tv_usec: limit.subsec_micros() as libc::suseconds_t,
        };
        let (read_ptr, write_ptr): (*mut libc::fd_set, *mut libc::fd_set) = match interest {
            Interest::Read => (&mut ready_set, ptr::null_mut()),
            Interest::Write => (ptr::null_mut(), &mut ready_set),
        };
        let ret = libc::select(fd + 1, read_ptr, write_ptr, &mut error_set, &mut tv);
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Ok(Readiness::default());
        }
        Ok(Readiness {
            ready: libc::FD_ISSET(fd, &ready_set),
            error: libc::FD_ISSET(fd, &error_set),
        })
    }
}

/// Fetch and clear the pending SO_ERROR. `Ok` means no error was latched.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&raw mut err).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if err != 0 {
        return Err(io::Error::from_raw_os_error(err));
    }
    Ok(())
}

fn set_opt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: T) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&raw const value).cast::<libc::c_void>(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

pub(crate) fn set_reuse_address(fd: RawFd, on: bool) -> io::Result<()> {
    set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on as libc::c_int)
}

pub(crate) fn set_reuse_port(fd: RawFd, on: bool) -> io::Result<()> {
    set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on as libc::c_int)
}

pub(crate) fn set_nodelay(fd: RawFd, on: bool) -> io::Result<()> {
    set_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on as libc::c_int)
}

/// Join `group` on the default interface. Scope stays on the local network
/// (TTL 1); IPv6 membership is not wired up yet.
pub(crate) fn join_multicast_v4(fd: RawFd, group: Ipv4Addr, allow_loopback: bool) -> io::Result<()> {
    set_opt(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_TTL, 1 as libc::c_uchar)?;
    set_opt(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, allow_loopback as libc::c_uchar)?;
    let req = libc::ip_mreq {
        imr_multiaddr: libc::in_addr { s_addr: u32::from_ne_bytes(group.octets()) },
        imr_interface: libc::in_addr { s_addr: libc::INADDR_ANY },
    };
    set_opt(fd, libc::IPPROTO_IP, libc::IP_ADD_MEMBERSHIP, req)
}

pub(crate) fn bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = sockaddr_from(addr);
    let ret = unsafe { libc::bind(fd, (&raw const storage).cast::<libc::sockaddr>(), len) };
    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

pub(crate) fn listen(fd: RawFd) -> io::Result<()> {
    let ret = unsafe { libc::listen(fd, libc::SOMAXCONN) };
    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnectStart {
    Done,
    InProgress,
}

pub(crate) fn connect(fd: RawFd, addr: &SocketAddr) -> io::Result<ConnectStart> {
    let (storage, len) = sockaddr_from(addr);
    let ret = unsafe { libc::connect(fd, (&raw const storage).cast::<libc::sockaddr>(), len) };
    if ret == 0 {
        return Ok(ConnectStart::Done);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return Ok(ConnectStart::InProgress);
    }
    Err(err)
}

pub(crate) fn accept(fd: RawFd) -> io::Result<(RawFd, Option<SocketAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let accepted = unsafe {
        libc::accept(fd, (&raw mut storage).cast::<libc::sockaddr>(), &mut len)
    };
    if accepted < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((accepted, sockaddr_to(&storage)))
}

pub(crate) fn local_address(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, (&raw mut storage).cast::<libc::sockaddr>(), &mut len)
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    sockaddr_to(&storage)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "unknown address family"))
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(ret as usize) }
}

pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ret = unsafe {
        libc::send(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len(), libc::MSG_NOSIGNAL)
    };
    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(ret as usize) }
}

pub(crate) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EAGAIN)
}

pub(crate) fn is_refused(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ECONNREFUSED)
}

/// Transport errors that mean the connection is gone for good.
pub(crate) fn is_fatal_transport(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(
            libc::ECONNRESET |
                libc::EPIPE |
                libc::ETIMEDOUT |
                libc::ENETDOWN |
                libc::ENETRESET |
                libc::ENOTCONN |
                libc::ECONNABORTED
        )
    )
}

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe { ptr::write((&raw mut storage).cast::<libc::sockaddr_in>(), sin) };
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe { ptr::write((&raw mut storage).cast::<libc::sockaddr_in6>(), sin6) };
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

fn sockaddr_to(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                sin6.sin6_addr.s6_addr.into(),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
