#![allow(dead_code)]

use std::sync::Arc;

use anonafrica_client_core::config::ClientConfig;
use anonafrica_client_core::scheduler::ManualScheduler;
use anonafrica_client_core::session::{PartnerCode, SessionContext, SessionDescriptor};
use anonafrica_client_core::transport::mock::{MockConnection, MockDialer};
use tokio::sync::watch;

/// Let spawned session tasks run until they block.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..2_000 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held: {what}");
}

pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    loop {
        {
            let current = rx.borrow_and_update();
            if pred(&current) {
                return current.clone();
            }
        }
        rx.changed().await.expect("session ended before condition held");
    }
}

pub fn descriptor(own: Option<&str>, partner: &str) -> SessionDescriptor {
    let partner: PartnerCode = partner.parse().expect("partner code");
    SessionDescriptor::new(own, partner, Some("client-test".into())).expect("descriptor")
}

pub fn mock_context(
    config: ClientConfig,
    descriptor: SessionDescriptor,
    dialer: &MockDialer,
    scheduler: &ManualScheduler,
) -> SessionContext {
    SessionContext::new(
        config,
        descriptor,
        Arc::new(dialer.clone()),
        Arc::new(scheduler.clone()),
    )
    .expect("context")
}

pub async fn nth_connection(dialer: &MockDialer, index: usize) -> MockConnection {
    eventually(|| dialer.dial_count() > index, "signaling dialed").await;
    dialer.connection(index)
}
