use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use wharf_net::{Network, NetworkConfig, SocketState};

fn net() -> Network {
    Network::new(NetworkConfig::default())
}

#[test]
fn create_and_destroy() {
    let net = net();
    let sock = net.tcp_create().unwrap();
    assert!(net.is_socket(sock));
    net.destroy(sock);
    assert!(!net.is_socket(sock));
    // second destroy is a no-op
    net.destroy(sock);
    assert!(!net.is_socket(sock));
}

#[test]
fn fresh_socket_starts_idle() {
    let net = net();
    let sock = net.tcp_create().unwrap();
    assert_eq!(net.state(sock), SocketState::NotConnected);
    assert_eq!(net.local_address(sock), None);
    assert_eq!(net.remote_address(sock), None);
    net.destroy(sock);
}

#[test]
fn blocking_toggle() {
    let net = net();
    let sock = net.tcp_create().unwrap();
    assert!(net.is_socket(sock));

    net.set_blocking(sock, false);
    assert!(!net.blocking(sock));

    net.set_blocking(sock, true);
    assert!(net.blocking(sock));

    net.destroy(sock);
    assert!(!net.is_socket(sock));
}

#[test]
fn option_flags_hold_before_any_fd_exists() {
    let net = net();
    let sock = net.tcp_create().unwrap();

    net.set_reuse_address(sock, true);
    assert!(net.reuse_address(sock));
    net.set_reuse_address(sock, false);
    assert!(!net.reuse_address(sock));

    net.set_reuse_port(sock, true);
    assert!(net.reuse_port(sock));

    net.set_tcp_delay(sock, true);
    assert!(net.tcp_delay(sock));
    net.set_tcp_delay(sock, false);
    assert!(!net.tcp_delay(sock));

    net.set_polled(sock, true);
    assert!(net.polled(sock));

    net.destroy(sock);
}

#[test]
fn ipv4_bind_scan() {
    let net = net();
    let sock = net.tcp_create().unwrap();

    assert_eq!(net.local_address(sock), None);
    assert_eq!(net.remote_address(sock), None);
    assert_eq!(net.state(sock), SocketState::NotConnected);

    let mut bound = None;
    for port in 31890..32890 {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        if net.bind(sock, addr) {
            bound = Some(addr);
            break;
        }
    }
    let addr = bound.expect("no bindable port in scan range");

    assert_eq!(net.local_address(sock), Some(addr));
    assert_eq!(net.remote_address(sock), None);
    assert_eq!(net.state(sock), SocketState::NotConnected);

    net.destroy(sock);
    assert!(!net.is_socket(sock));
}

#[test]
fn ipv6_bind_scan() {
    let net = net();
    if !net.supports_ipv6() {
        return;
    }
    let sock = net.tcp_create().unwrap();

    let mut bound = None;
    for port in 31890..32890 {
        let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        if net.bind(sock, addr) {
            bound = Some(addr);
            break;
        }
    }
    let addr = bound.expect("no bindable port in scan range");

    assert_eq!(net.local_address(sock), Some(addr));
    assert_eq!(net.remote_address(sock), None);
    assert_eq!(net.state(sock), SocketState::NotConnected);

    net.destroy(sock);
}

#[test]
fn stale_handles_fail_quietly() {
    let net = net();
    let sock = net.tcp_create().unwrap();
    net.destroy(sock);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    assert!(!net.bind(sock, addr));
    assert!(!net.connect(sock, addr, None));
    assert!(!net.listen(sock));
    assert_eq!(net.accept(sock, None), None);
    assert_eq!(net.state(sock), SocketState::NotConnected);
    assert_eq!(net.local_address(sock), None);
    assert!(!net.blocking(sock));
    assert!(!net.set_multicast_group(sock, Ipv4Addr::new(239, 0, 0, 1), false));
    net.close(sock);
    net.destroy(sock);
}

#[test]
fn slot_pool_exhaustion_surfaces_and_recovers() {
    let net = Network::new(NetworkConfig { max_sockets: 2 });
    let first = net.tcp_create().unwrap();
    let second = net.tcp_create().unwrap();
    let third = net.tcp_create().unwrap();

    net.set_blocking(first, true);
    net.set_blocking(second, true);
    assert!(net.blocking(first));
    assert!(net.blocking(second));

    // pool is out of slots: the option cannot stick
    net.set_blocking(third, true);
    assert!(!net.blocking(third));

    // freeing a record returns its slot
    net.destroy(first);
    net.set_blocking(third, true);
    assert!(net.blocking(third));

    net.destroy(second);
    net.destroy(third);
}

#[test]
fn double_connect_is_rejected() {
    let net = std::sync::Arc::new(net());
    let listener = net.tcp_create().unwrap();
    assert!(net.bind(listener, SocketAddr::from((Ipv4Addr::LOCALHOST, 0))));
    assert!(net.listen(listener));
    assert_eq!(net.state(listener), SocketState::Listening);
    let addr = net.local_address(listener).unwrap();

    let client = net.tcp_create().unwrap();
    assert!(net.connect(client, addr, Some(std::time::Duration::from_secs(1))));
    assert!(!net.connect(client, addr, Some(std::time::Duration::from_secs(1))));

    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn multicast_needs_an_open_descriptor() {
    let net = net();
    let sock = net.tcp_create().unwrap();
    // no fd has been opened yet
    assert!(!net.set_multicast_group(sock, Ipv4Addr::new(239, 255, 0, 1), true));
    net.destroy(sock);
}
