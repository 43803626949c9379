//! VIP responder integration tests
//!
//! These tests require CAP_NET_RAW/CAP_NET_ADMIN to run.
//! Run with: sudo -E VIP_TEST_ENABLED=1 cargo test --test integration_test
//!
//! Tests cover:
//! - Lifecycle of an IPv4 VIP (add, enable, disable, delete)
//! - Lifecycle of IPv6 VIPs sharing a solicited-node group
//! - Interface registration
//! - Neighbor Discovery proxy services

use std::env;
use vip::{NdProxy, Responder};

/// Check if integration tests are enabled
fn integration_tests_enabled() -> bool {
    env::var("VIP_TEST_ENABLED").is_ok()
}

#[test]
fn test_interface_registration() {
    let responder = Responder::new();

    // "lo" always exists and registering it twice is a no-op.
    responder.vip_interface("lo").unwrap();
    responder.vip_interface("lo").unwrap();

    assert!(responder.vip_interface("nonexistent99").is_err());
}

#[test]
fn test_ipv4_lifecycle() {
    if !integration_tests_enabled() {
        println!("Skipping integration test (set VIP_TEST_ENABLED=1 to run)");
        return;
    }

    let responder = Responder::new();

    // TEST-NET-1 address; with no registered interface the gratuitous
    // announcement is a no-op, but the listeners must come up.
    if let Err(e) = responder.add("192.0.2.10") {
        eprintln!("Failed to start listeners: {}", e);
        eprintln!("Make sure to run with CAP_NET_RAW: sudo -E cargo test");
        return;
    }

    responder.enable("192.0.2.10").expect("enable should succeed");
    responder.disable("192.0.2.10").expect("disable should succeed");
    responder.delete("192.0.2.10").expect("delete should succeed");

    println!("✓ IPv4 lifecycle test passed");
}

#[test]
fn test_ipv6_shared_group_lifecycle() {
    if !integration_tests_enabled() {
        println!("Skipping integration test (set VIP_TEST_ENABLED=1 to run)");
        return;
    }

    let responder = Responder::new();

    // Both addresses share the low 24 bits, hence one solicited-node group.
    let first = "2001:db8::a:b:c:d";
    let second = "2001:db8::e:f:c:d";

    if let Err(e) = responder.add(first) {
        eprintln!("Failed to start listeners: {}", e);
        return;
    }
    responder.add(second).expect("add should succeed");

    responder.enable(first).expect("enable should succeed");
    responder.enable(second).expect("enable should succeed");

    // Disabling one must keep the shared group joined for the other.
    responder.disable(first).expect("disable should succeed");
    responder.disable(second).expect("disable should succeed");

    responder.delete(first).expect("delete should succeed");
    responder.delete(second).expect("delete should succeed");

    println!("✓ IPv6 shared group lifecycle test passed");
}

#[test]
fn test_enable_is_idempotent() {
    if !integration_tests_enabled() {
        println!("Skipping integration test (set VIP_TEST_ENABLED=1 to run)");
        return;
    }

    let responder = Responder::new();

    if let Err(e) = responder.enable("192.0.2.11") {
        eprintln!("Failed to start listeners: {}", e);
        return;
    }
    responder.enable("192.0.2.11").expect("re-enable should succeed");
    responder.disable("192.0.2.11").expect("disable should succeed");

    println!("✓ Enable idempotency test passed");
}

#[test]
fn test_nd_proxy_lifecycle() {
    if !integration_tests_enabled() {
        println!("Skipping integration test (set VIP_TEST_ENABLED=1 to run)");
        return;
    }

    let proxy = NdProxy::new();

    if let Err(e) = proxy.add_address("2001:db8::100") {
        eprintln!("Failed to create proxy service: {}", e);
        return;
    }
    assert!(proxy.contains("2001:db8::100"));

    // Adding again is a no-op.
    proxy.add_address("2001:db8::100").expect("re-add should succeed");

    proxy.del_address("2001:db8::100").expect("del should succeed");
    assert!(!proxy.contains("2001:db8::100"));

    println!("✓ ND proxy lifecycle test passed");
}
