//! Session lifecycle against a scripted agent

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use common::{
    address_of, key, manager_with, manager_with_settings, ScriptedAgent, SignBehavior, ONE_ETHER,
};
use rampwool_wallet::agent::{AgentEvent, Capabilities};
use rampwool_wallet::session::ZERO_BALANCE;
use rampwool_wallet::{AgentKind, Environment, Error, Session, SessionState, WalletSessionManager};

const WAIT: Duration = Duration::from_secs(2);

async fn wait_for_session<F>(manager: &WalletSessionManager, predicate: F) -> Session
where
    F: FnMut(&Session) -> bool,
{
    let mut updates = manager.watch();
    let session = tokio::time::timeout(WAIT, updates.wait_for(predicate))
        .await
        .expect("timed out waiting for session update")
        .expect("session channel closed");
    session.clone()
}

async fn wait_for_listeners(agent: &ScriptedAgent, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while agent.listener_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} listeners, have {}",
            expected,
            agent.listener_count()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn single_account_agent(chain_id: u64) -> Arc<ScriptedAgent> {
    Arc::new(ScriptedAgent::new("A", &[key(1)], chain_id))
}

#[tokio::test]
async fn test_connect_single_account() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(3 * ONE_ETHER / 2));
    let manager = manager_with(agent.clone(), false);

    let session = manager.connect(AgentKind::Injected).await.unwrap();

    assert_eq!(session.address(), Some(address_of(&key(1)).as_str()));
    assert_eq!(session.chain_id(), Some(570));
    assert_eq!(session.balance(), "1.5000");
    assert!(!session.is_verified());
    assert_eq!(manager.state().await, SessionState::Connected { verified: false });
    assert_eq!(manager.agent_kind().await, Some(AgentKind::Injected));
    assert_eq!(agent.calls("eth_requestAccounts").len(), 1);
}

#[tokio::test]
async fn test_connect_then_disconnect_clears_everything() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    let manager = manager_with(agent.clone(), true);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_verified());

    manager.disconnect().await;

    let session = manager.session().await;
    assert_eq!(session, Session::default());
    assert!(session.address().is_none());
    assert!(session.chain_id().is_none());
    assert!(!session.is_verified());
    assert_eq!(session.balance(), ZERO_BALANCE);
    assert_eq!(manager.state().await, SessionState::Disconnected);
    assert_eq!(manager.agent_kind().await, None);

    // Idempotent
    manager.disconnect().await;
    assert_eq!(manager.session().await, Session::default());
}

#[tokio::test]
async fn test_agent_not_found() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), false);

    let err = manager.connect(AgentKind::MetaMask).await.unwrap_err();
    assert!(matches!(err, Error::AgentNotFound(ref kind) if kind == "metamask"));
    assert_eq!(manager.session().await, Session::default());
    assert!(agent.calls("eth_requestAccounts").is_empty());
}

#[tokio::test]
async fn test_empty_environment_reports_agent_not_found() {
    let manager = WalletSessionManager::new(
        Environment::new(),
        rampwool_wallet::NetworkRegistry::new(rampwool_wallet::network::default_networks()).unwrap(),
        common::settings(false),
    );
    assert!(matches!(
        manager.connect(AgentKind::Injected).await,
        Err(Error::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn test_probe_prefers_matching_capabilities() {
    let rabby = Arc::new(
        ScriptedAgent::new("rabby", &[key(2)], 570).with_capabilities(Capabilities {
            is_metamask: true,
            is_rabby: true,
            ..Default::default()
        }),
    );
    let metamask = Arc::new(
        ScriptedAgent::new("metamask", &[key(3)], 570).with_capabilities(Capabilities {
            is_metamask: true,
            ..Default::default()
        }),
    );
    let environment = Environment::new()
        .with_agent(rabby.clone())
        .with_agent(metamask.clone());
    let manager = WalletSessionManager::new(
        environment,
        rampwool_wallet::NetworkRegistry::new(rampwool_wallet::network::default_networks()).unwrap(),
        common::settings(false),
    );

    let session = manager.connect(AgentKind::MetaMask).await.unwrap();
    assert_eq!(session.address(), Some(address_of(&key(3)).as_str()));
    assert!(rabby.calls("eth_requestAccounts").is_empty());
}

#[tokio::test]
async fn test_user_rejects_connect() {
    let agent = single_account_agent(570);
    agent.reject_accounts(true);
    let manager = manager_with(agent.clone(), false);

    let err = manager.connect(AgentKind::Injected).await.unwrap_err();
    assert!(matches!(err, Error::UserRejected));
    assert_eq!(manager.session().await, Session::default());
    assert_eq!(manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.listener_count(), 0);
}

#[tokio::test]
async fn test_connect_with_no_accounts_is_rejection() {
    let agent = Arc::new(ScriptedAgent::new("A", &[], 570));
    let manager = manager_with(agent, false);

    assert!(matches!(
        manager.connect(AgentKind::Injected).await,
        Err(Error::UserRejected)
    ));
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_overlapping_connect_is_refused() {
    let agent = single_account_agent(570);
    agent.latency(Some(Duration::from_millis(100)));
    let manager = Arc::new(manager_with(agent.clone(), false));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(AgentKind::Injected).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.state().await, SessionState::Connecting);
    assert!(matches!(
        manager.connect(AgentKind::Injected).await,
        Err(Error::ConnectInProgress)
    ));

    let session = first.await.unwrap().unwrap();
    assert!(session.is_connected());
    assert_eq!(agent.calls("eth_requestAccounts").len(), 1);
}

#[tokio::test]
async fn test_reconnect_with_different_account() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), true);

    let first = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(first.is_verified());

    agent.set_accounts(&[key(2)]);
    let second = manager.connect(AgentKind::Injected).await.unwrap();
    assert_eq!(second.address(), Some(address_of(&key(2)).as_str()));

    // Verification never carries over to a different address
    agent.sign_behavior(SignBehavior::Reject);
    agent.set_accounts(&[key(3)]);
    let third = manager.connect(AgentKind::Injected).await.unwrap();
    assert_eq!(third.address(), Some(address_of(&key(3)).as_str()));
    assert!(!third.is_verified());
}

#[tokio::test]
async fn test_reconnect_does_not_accumulate_listeners() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), false);

    for _ in 0..3 {
        manager.connect(AgentKind::Injected).await.unwrap();
    }
    wait_for_listeners(&agent, 1).await;

    manager.disconnect().await;
    wait_for_listeners(&agent, 0).await;

    // Notifications after disconnect do nothing
    agent.emit(AgentEvent::ChainChanged(57000));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.session().await, Session::default());
}

#[tokio::test]
async fn test_account_change_resets_verification() {
    let agent = Arc::new(ScriptedAgent::new("A", &[key(1), key(2)], 570));
    agent.set_balance(&address_of(&key(2)), U256::from(2 * ONE_ETHER));
    let manager = manager_with(agent.clone(), true);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_verified());

    let next = address_of(&key(2));
    agent.emit(AgentEvent::AccountsChanged(vec![next.to_lowercase()]));

    let session = wait_for_session(&manager, |s| s.balance() == "2.0000").await;
    assert_eq!(session.address(), Some(next.as_str()));
    assert!(!session.is_verified());
    assert_eq!(session.chain_id(), Some(570));
}

#[tokio::test]
async fn test_empty_account_change_disconnects() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), true);
    manager.connect(AgentKind::Injected).await.unwrap();

    agent.emit(AgentEvent::AccountsChanged(vec![]));

    let session = wait_for_session(&manager, |s| !s.is_connected()).await;
    assert_eq!(session, Session::default());
    assert_eq!(manager.agent_kind().await, None);
    wait_for_listeners(&agent, 0).await;

    assert!(matches!(manager.switch_network(570).await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_chain_change_updates_in_place() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    let manager = manager_with(agent.clone(), true);
    manager.connect(AgentKind::Injected).await.unwrap();

    agent.emit(AgentEvent::ChainChanged(57000));

    let session = wait_for_session(&manager, |s| s.chain_id() == Some(57000)).await;
    assert_eq!(session.address(), Some(address_of(&key(1)).as_str()));
    assert!(session.is_verified());
}

#[tokio::test]
async fn test_verify_ownership_with_wrong_signer() {
    let agent = single_account_agent(570);
    agent.sign_behavior(SignBehavior::WrongKey);
    let manager = manager_with(agent.clone(), true);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_connected());
    assert!(!session.is_verified());

    let address = address_of(&key(1));
    assert!(!manager.verify_ownership(&address).await);
    assert!(!manager.session().await.is_verified());
}

#[tokio::test]
async fn test_verify_ownership_rejected_keeps_connection() {
    let agent = single_account_agent(570);
    agent.sign_behavior(SignBehavior::Reject);
    let manager = manager_with(agent.clone(), false);
    let session = manager.connect(AgentKind::Injected).await.unwrap();

    assert!(!manager.verify_ownership(session.address().unwrap()).await);
    assert_eq!(manager.state().await, SessionState::Connected { verified: false });
}

#[tokio::test]
async fn test_failed_reverification_revokes() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), true);
    let address = address_of(&key(1));

    assert!(manager.connect(AgentKind::Injected).await.unwrap().is_verified());

    agent.sign_behavior(SignBehavior::WrongKey);
    assert!(!manager.verify_ownership(&address).await);
    assert!(!manager.session().await.is_verified());

    agent.sign_behavior(SignBehavior::Honest);
    assert!(manager.verify_ownership(&address.to_lowercase()).await);
    assert!(manager.session().await.is_verified());
}

#[tokio::test]
async fn test_verify_ownership_sends_challenge() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), true);
    manager.connect(AgentKind::Injected).await.unwrap();

    let calls = agent.calls("personal_sign");
    assert_eq!(calls.len(), 1);
    let message = hex::decode(calls[0][0].as_str().unwrap().trim_start_matches("0x")).unwrap();
    let message = String::from_utf8(message).unwrap();
    assert!(message.starts_with("Welcome to RampWool!"));
    assert!(message.contains(&address_of(&key(1))));
}

#[tokio::test]
async fn test_verify_without_connection() {
    let manager = manager_with(single_account_agent(570), false);
    assert!(!manager.verify_ownership(&address_of(&key(1))).await);
}

#[tokio::test]
async fn test_switch_to_known_chain() {
    let agent = single_account_agent(570);
    agent.add_known_chain(57000);
    let manager = manager_with(agent.clone(), false);
    manager.connect(AgentKind::Injected).await.unwrap();

    manager.switch_network(57000).await.unwrap();

    let session = wait_for_session(&manager, |s| s.chain_id() == Some(57000)).await;
    assert!(session.is_connected());
    let calls = agent.calls("wallet_switchEthereumChain");
    assert_eq!(calls[0][0]["chainId"], "0xdea8");
    assert!(agent.calls("wallet_addEthereumChain").is_empty());
}

#[tokio::test]
async fn test_switch_adds_configured_chain() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), false);
    manager.connect(AgentKind::Injected).await.unwrap();

    manager.switch_network(5700).await.unwrap();

    let added = agent.calls("wallet_addEthereumChain");
    assert_eq!(added.len(), 1);
    let params = &added[0][0];
    assert_eq!(params["chainId"], "0x1644");
    assert_eq!(params["chainName"], "Syscoin Tanenbaum");
    assert_eq!(params["nativeCurrency"]["decimals"], 18);
    assert!(params["rpcUrls"].as_array().is_some_and(|urls| !urls.is_empty()));

    wait_for_session(&manager, |s| s.chain_id() == Some(5700)).await;
}

#[tokio::test]
async fn test_switch_to_unknown_network() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), false);
    manager.connect(AgentKind::Injected).await.unwrap();

    let err = manager.switch_network(999_999).await.unwrap_err();
    assert!(matches!(err, Error::UnknownNetwork(999_999)));
    assert_eq!(manager.session().await.chain_id(), Some(570));
    assert_eq!(agent.chain_id(), 570);
}

#[tokio::test]
async fn test_switch_add_rejected() {
    let agent = single_account_agent(570);
    agent.reject_add_chain(true);
    let manager = manager_with(agent.clone(), false);
    manager.connect(AgentKind::Injected).await.unwrap();

    assert!(matches!(
        manager.switch_network(57).await,
        Err(Error::SwitchFailed(_))
    ));
    assert_eq!(manager.session().await.chain_id(), Some(570));
}

#[tokio::test]
async fn test_switch_requires_connection() {
    let manager = manager_with(single_account_agent(570), false);
    assert!(matches!(
        manager.switch_network(570).await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_refresh_balance() {
    let agent = single_account_agent(570);
    let manager = manager_with(agent.clone(), false);
    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert_eq!(session.balance(), "0.0000");

    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER / 4));
    manager.refresh_balance().await.unwrap();
    assert_eq!(manager.session().await.balance(), "0.2500");

    manager.disconnect().await;
    assert!(matches!(manager.refresh_balance().await, Err(Error::NotConnected)));
}

async fn wait_for_calls(agent: &ScriptedAgent, method: &str, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while agent.calls(method).len() < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} {} calls",
            expected,
            method
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_disconnect_during_connect_wins() {
    let agent = single_account_agent(570);
    agent.latency(Some(Duration::from_millis(100)));
    let manager = Arc::new(manager_with(agent.clone(), false));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(AgentKind::Injected).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.state().await, SessionState::Connecting);

    manager.disconnect().await;
    assert_eq!(manager.state().await, SessionState::Disconnected);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::ConnectCancelled)));
    assert_eq!(manager.session().await, Session::default());
    assert_eq!(manager.state().await, SessionState::Disconnected);
    assert_eq!(manager.agent_kind().await, None);
    assert_eq!(agent.listener_count(), 0);

    // A later connect is unaffected
    agent.latency(None);
    assert!(manager.connect(AgentKind::Injected).await.unwrap().is_connected());
}

#[tokio::test]
async fn test_account_change_during_connect_is_applied() {
    let agent = single_account_agent(570);
    agent.latency(Some(Duration::from_millis(50)));
    agent.set_balance(&address_of(&key(2)), U256::from(2 * ONE_ETHER));
    let manager = Arc::new(manager_with(agent.clone(), false));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(AgentKind::Injected).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let next = address_of(&key(2));
    agent.emit(AgentEvent::AccountsChanged(vec![next.to_lowercase()]));

    let session = pending.await.unwrap().unwrap();
    assert_eq!(session.address(), Some(next.as_str()));
    assert_eq!(session.balance(), "2.0000");
    wait_for_listeners(&agent, 1).await;
}

#[tokio::test]
async fn test_balance_failure_on_connect_still_connects() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    agent.fail_balance(true);
    let manager = manager_with(agent.clone(), false);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(session.balance(), ZERO_BALANCE);
    assert_eq!(agent.calls("eth_getBalance").len(), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_balance() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    let manager = manager_with(agent.clone(), false);
    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert_eq!(session.balance(), "1.0000");

    agent.fail_balance(true);
    agent.emit(AgentEvent::ChainChanged(57000));

    wait_for_session(&manager, |s| s.chain_id() == Some(57000)).await;
    wait_for_calls(&agent, "eth_getBalance", 2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let session = manager.session().await;
    assert_eq!(session.balance(), "1.0000");
    assert!(session.is_connected());
    assert!(matches!(manager.refresh_balance().await, Err(Error::Rpc(_))));
    assert_eq!(manager.session().await.balance(), "1.0000");
}

#[tokio::test]
async fn test_switch_rejected_by_user_is_switch_failed() {
    let agent = single_account_agent(570);
    agent.add_known_chain(57000);
    agent.reject_switch(true);
    let manager = manager_with(agent.clone(), false);
    manager.connect(AgentKind::Injected).await.unwrap();

    assert!(matches!(
        manager.switch_network(57000).await,
        Err(Error::SwitchFailed(_))
    ));
    assert!(agent.calls("wallet_addEthereumChain").is_empty());
    assert_eq!(manager.session().await.chain_id(), Some(570));
    assert_eq!(agent.chain_id(), 570);
}

#[tokio::test]
async fn test_restore_authorized_session() {
    let agent = single_account_agent(570);
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    let manager = manager_with(agent.clone(), true);

    let session = manager.restore(AgentKind::Injected).await.unwrap().unwrap();
    assert_eq!(session.address(), Some(address_of(&key(1)).as_str()));
    assert_eq!(session.balance(), "1.0000");
    assert!(!session.is_verified());

    assert_eq!(agent.calls("eth_accounts").len(), 1);
    assert!(agent.calls("eth_requestAccounts").is_empty());
    assert!(agent.calls("personal_sign").is_empty());
    wait_for_listeners(&agent, 1).await;

    agent.emit(AgentEvent::ChainChanged(57000));
    wait_for_session(&manager, |s| s.chain_id() == Some(57000)).await;
}

#[tokio::test]
async fn test_restore_without_authorized_accounts() {
    let agent = Arc::new(ScriptedAgent::new("A", &[], 570));
    let manager = manager_with(agent.clone(), false);

    assert!(manager.restore(AgentKind::Injected).await.unwrap().is_none());
    assert_eq!(manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.listener_count(), 0);
    assert!(matches!(
        manager.restore(AgentKind::MetaMask).await,
        Err(Error::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn test_supported_network() {
    let agent = single_account_agent(1);
    let manager = manager_with(agent.clone(), false);
    assert!(!manager.is_supported_network().await);

    manager.connect(AgentKind::Injected).await.unwrap();
    assert!(!manager.is_supported_network().await);

    agent.emit(AgentEvent::ChainChanged(570));
    wait_for_session(&manager, |s| s.chain_id() == Some(570)).await;
    assert!(manager.is_supported_network().await);
    assert!(agent.calls("wallet_switchEthereumChain").is_empty());
}

#[tokio::test]
async fn test_auto_switch_from_unsupported_chain() {
    let agent = single_account_agent(1);
    agent.add_known_chain(57000);
    let mut settings = common::settings(false);
    settings.auto_switch_to = Some(57000);
    let manager = manager_with_settings(agent.clone(), settings);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_connected());

    let calls = agent.calls("wallet_switchEthereumChain");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0]["chainId"], "0xdea8");

    wait_for_session(&manager, |s| s.chain_id() == Some(57000)).await;
    assert!(manager.is_supported_network().await);
}

#[tokio::test]
async fn test_auto_switch_skipped_on_supported_chain() {
    let agent = single_account_agent(570);
    let mut settings = common::settings(false);
    settings.auto_switch_to = Some(57000);
    let manager = manager_with_settings(agent.clone(), settings);

    manager.connect(AgentKind::Injected).await.unwrap();
    assert!(agent.calls("wallet_switchEthereumChain").is_empty());
    assert_eq!(manager.session().await.chain_id(), Some(570));
}

#[tokio::test]
async fn test_failed_auto_switch_keeps_connection() {
    let agent = single_account_agent(1);
    agent.reject_switch(true);
    let mut settings = common::settings(false);
    settings.auto_switch_to = Some(57000);
    let manager = manager_with_settings(agent.clone(), settings);

    let session = manager.connect(AgentKind::Injected).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(session.chain_id(), Some(1));
    assert!(!manager.is_supported_network().await);
}

#[tokio::test]
async fn test_account_change_never_publishes_previous_balance() {
    let agent = Arc::new(ScriptedAgent::new("A", &[key(1), key(2)], 570));
    agent.set_balance(&address_of(&key(1)), U256::from(ONE_ETHER));
    agent.set_balance(&address_of(&key(2)), U256::from(2 * ONE_ETHER));
    let manager = manager_with(agent.clone(), false);
    assert_eq!(manager.connect(AgentKind::Injected).await.unwrap().balance(), "1.0000");

    let next = address_of(&key(2));
    agent.emit(AgentEvent::AccountsChanged(vec![next.clone()]));

    let session = wait_for_session(&manager, |s| s.address() == Some(next.as_str())).await;
    assert_ne!(session.balance(), "1.0000");
    wait_for_session(&manager, |s| s.balance() == "2.0000").await;
}
