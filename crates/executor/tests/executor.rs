//! End-to-end serial execution scenarios: deploy + call, nested
//! create + call, revert semantics, the fixed-address crypto contracts
//! and two-phase commit across blocks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ethereum_types::H256;
use hex_literal::hex;
use tabrex_common::constants::ACCOUNT_FROZEN;
use tabrex_common::{
    BlockHeaderView, ExecutionMessage, ExecutorConfig, MessageType, VmKind,
};
use tabrex_executor::{BlockContext, Executive, LockMode, TransactionExecutor};
use tabrex_precompiled::{func_selector, Codec, ParamType, Value};
use tabrex_storage::{MemoryBackend, StateStorage};

use common::ScriptedVm;

const SENDER: &str = "1234567890123456789012345678901234567890";
const GAS: i64 = 3_000_000;

fn native_executor(backend: Arc<MemoryBackend>) -> TransactionExecutor {
    common::init_tracing();
    let config = ExecutorConfig {
        vm_kind: VmKind::Native,
        ..ExecutorConfig::default()
    };
    TransactionExecutor::new(
        backend,
        Arc::new(ScriptedVm::new(VmKind::Native)),
        config,
        Arc::new(|_| H256::zero()),
    )
}

fn header(number: u64) -> BlockHeaderView {
    BlockHeaderView {
        number,
        hash: H256::repeat_byte(number as u8),
        timestamp: 1_000_000 + number,
        version: 1,
    }
}

fn deploy_message(context_id: u64, code: &[u8]) -> ExecutionMessage {
    let mut message = ExecutionMessage::new(MessageType::Message, context_id, 0);
    message.from = SENDER.to_string();
    message.origin = SENDER.to_string();
    message.gas_available = GAS;
    message.data = Bytes::copy_from_slice(code);
    message.create = true;
    message
}

fn call_message(context_id: u64, to: &str, data: Vec<u8>) -> ExecutionMessage {
    let mut message = ExecutionMessage::new(MessageType::Message, context_id, 0);
    message.from = SENDER.to_string();
    message.origin = SENDER.to_string();
    message.to = to.to_string();
    message.gas_available = GAS;
    message.data = Bytes::from(data);
    message
}

fn encode_call(signature: &str, values: &[Value], codec: &Codec) -> Vec<u8> {
    let mut data = func_selector(signature).to_be_bytes().to_vec();
    data.extend_from_slice(&codec.encode(values));
    data
}

#[tokio::test]
async fn deploy_and_call_returns_greeting() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    let deployed = executor
        .execute_transaction(deploy_message(100, b"hello:Hello, World!"))
        .await
        .expect("deploy runs");
    assert_eq!(deployed.ty, MessageType::Finished);
    assert_eq!(deployed.status, 0);
    let address = deployed.new_contract_address.clone();
    assert_eq!(address.len(), 40);

    let codec = Codec::new(VmKind::Native);
    let reply = executor
        .execute_transaction(call_message(101, &address, encode_call("get()", &[], &codec)))
        .await
        .expect("call runs");

    assert_eq!(reply.ty, MessageType::Finished);
    assert_eq!(
        reply.data.to_vec(),
        codec.encode(&[Value::String("Hello, World!".to_string())])
    );
}

#[tokio::test]
async fn nested_create_and_call() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    let deployed = executor
        .execute_transaction(deploy_message(100, b"factory"))
        .await
        .expect("deploy runs");
    let factory = deployed.new_contract_address.clone();

    let codec = Codec::new(VmKind::Native);
    let reply = executor
        .execute_transaction(call_message(
            101,
            &factory,
            encode_call(
                "createAndCallB(int256)",
                &[Value::Int(1000.into())],
                &codec,
            ),
        ))
        .await
        .expect("call runs");

    assert_eq!(reply.ty, MessageType::Finished);
    assert_eq!(reply.data.to_vec(), codec.encode(&[Value::Int(1000.into())]));
}

#[tokio::test]
async fn reverted_write_is_invisible_to_the_next_transaction() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    let deployed = executor
        .execute_transaction(deploy_message(100, b"flaky"))
        .await
        .expect("deploy runs");
    let address = deployed.new_contract_address.clone();
    let hash_before = executor.state_hash().await.expect("hash");

    let codec = Codec::new(VmKind::Native);
    let bumped = executor
        .execute_transaction(call_message(
            101,
            &address,
            encode_call("bump()", &[], &codec),
        ))
        .await
        .expect("transaction runs");
    assert_eq!(bumped.ty, MessageType::Revert);
    assert!(bumped.message.contains("bump always throws"));
    assert!(bumped.log_entries.is_empty());

    // the reverted write left no trace in the dirty-row digest
    assert_eq!(executor.state_hash().await.expect("hash"), hash_before);

    let read = executor
        .execute_transaction(call_message(
            102,
            &address,
            encode_call("counter()", &[], &codec),
        ))
        .await
        .expect("transaction runs");
    assert_eq!(read.ty, MessageType::Finished);
    assert!(read.data.is_empty(), "counter slot was never committed");
}

#[tokio::test]
async fn transaction_failure_does_not_fail_the_block() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    // call into empty address: the transaction reverts, the block goes on
    let reply = executor
        .execute_transaction(call_message(
            100,
            "00000000000000000000000000000000000000ff",
            vec![0, 0, 0, 0],
        ))
        .await
        .expect("executor survives");
    assert_eq!(reply.ty, MessageType::Revert);

    let deployed = executor
        .execute_transaction(deploy_message(101, b"hello:still alive"))
        .await
        .expect("deploy runs");
    assert_eq!(deployed.ty, MessageType::Finished);

    let receipts = executor.receipts().await;
    assert_eq!(receipts.len(), 2);
    assert_ne!(receipts[0].status, 0);
    assert_eq!(receipts[1].status, 0);
}

#[tokio::test]
async fn out_of_gas_reverts_the_frame() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    let deployed = executor
        .execute_transaction(deploy_message(100, b"hello:hi"))
        .await
        .expect("deploy runs");
    let address = deployed.new_contract_address.clone();

    let codec = Codec::new(VmKind::Native);
    let mut starved = call_message(101, &address, encode_call("get()", &[], &codec));
    starved.gas_available = 1;
    let reply = executor
        .execute_transaction(starved)
        .await
        .expect("transaction runs");
    assert_eq!(reply.ty, MessageType::Revert);
    assert!(reply.message.contains("out of gas"));
}

#[tokio::test]
async fn ecrecover_contract_at_reserved_address() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    executor.begin_block(header(1)).await.expect("block opened");

    let mut input = Vec::new();
    input.extend_from_slice(&hex!(
        "18c547e4f7b0f325ad1e56f57e26c745b09a3e503d86e00e5255ff7f715d3d1c"
    ));
    let mut v = [0u8; 32];
    v[31] = 28;
    input.extend_from_slice(&v);
    input.extend_from_slice(&hex!(
        "73b1693892219d736caba55bdb67216e485557ea6b6af75f37096c9aa6a5a75f"
    ));
    input.extend_from_slice(&hex!(
        "eeb940b1d03b21e36b0e47e79769f095fe2ab855bd91e3a38756b7d75a9c4549"
    ));

    let reply = executor
        .execute_transaction(call_message(
            100,
            "0000000000000000000000000000000000000001",
            input,
        ))
        .await
        .expect("call runs");

    assert_eq!(reply.ty, MessageType::Finished);
    let mut expected = vec![0u8; 32];
    expected[12..].copy_from_slice(&hex!("ceaccac640adf55b2028469bd36ba501f28b699d"));
    assert_eq!(reply.data.to_vec(), expected);
}

#[tokio::test]
async fn frozen_and_killed_contracts_reject_calls() {
    common::init_tracing();
    let backend = MemoryBackend::new();
    let storage = StateStorage::with_backend(backend);
    let context = BlockContext::new(
        header(1),
        VmKind::Native,
        storage,
        Arc::new(ScriptedVm::new(VmKind::Native)),
        Arc::new(|_| H256::zero()),
    )
    .await
    .expect("context created");

    let deploy_id = context.next_context_id();
    let deployed = Executive::new(context.clone(), deploy_id)
        .execute(deploy_message(100, b"hello:hi"))
        .await;
    assert_eq!(deployed.ty, MessageType::Finished);
    let address = deployed.new_contract_address.clone();
    context.ledger.release_all(deploy_id);

    let codec = Codec::new(VmKind::Native);
    let get = encode_call("get()", &[], &codec);

    // frozen: calls are denied until thawed
    context
        .state
        .set_storage(&address, ACCOUNT_FROZEN, &b"true"[..])
        .await
        .expect("frozen");
    let frozen_id = context.next_context_id();
    let reply = Executive::new(context.clone(), frozen_id)
        .execute(call_message(101, &address, get.clone()))
        .await;
    assert_eq!(reply.ty, MessageType::Revert);
    assert!(reply.message.contains("frozen"));
    context.ledger.release_all(frozen_id);

    context
        .state
        .set_storage(&address, ACCOUNT_FROZEN, &b"false"[..])
        .await
        .expect("thawed");
    let thawed_id = context.next_context_id();
    let reply = Executive::new(context.clone(), thawed_id)
        .execute(call_message(102, &address, get.clone()))
        .await;
    assert_eq!(reply.ty, MessageType::Finished);
    context.ledger.release_all(thawed_id);

    // killed: the account no longer accepts calls either
    context.state.kill(&address).await.expect("killed");
    let killed_id = context.next_context_id();
    let reply = Executive::new(context.clone(), killed_id)
        .execute(call_message(103, &address, get))
        .await;
    assert_eq!(reply.ty, MessageType::Revert);
}

#[tokio::test]
async fn wait_key_suspends_until_holder_releases() {
    let backend = MemoryBackend::new();
    let executor = Arc::new(native_executor(backend));
    executor.begin_block(header(1)).await.expect("block opened");

    let deployed = executor
        .execute_transaction(deploy_message(100, b"hello:patience"))
        .await
        .expect("deploy runs");
    let address = deployed.new_contract_address.clone();
    let table = format!("c_{address}");

    // simulate a parallel transaction still holding the greeting slot
    let ledger = executor.key_lock_ledger().await.expect("ledger");
    assert!(ledger.try_acquire(9999, &table, "value", LockMode::Write).is_ok());

    let codec = Codec::new(VmKind::Native);
    let call = {
        let executor = executor.clone();
        let address = address.clone();
        tokio::spawn(async move {
            executor
                .execute_transaction(call_message(101, &address, encode_call("get()", &[], &codec)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!call.is_finished(), "transaction parks on the held key");

    ledger.release_all(9999);
    let reply = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("resumes after release")
        .expect("task joins")
        .expect("transaction runs");
    assert_eq!(reply.ty, MessageType::Finished);
    assert_eq!(
        reply.data.to_vec(),
        codec.encode(&[Value::String("patience".to_string())])
    );
}

#[tokio::test]
async fn two_phase_commit_persists_across_blocks() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend.clone());

    executor.begin_block(header(1)).await.expect("block opened");
    let deployed = executor
        .execute_transaction(deploy_message(100, b"hello:persisted"))
        .await
        .expect("deploy runs");
    let address = deployed.new_contract_address.clone();

    executor.prepare(1).await.expect("prepared");
    executor.commit(1).await.expect("committed");

    // a new block over the same backend sees the committed rows
    executor.begin_block(header(2)).await.expect("block opened");
    let codec = Codec::new(VmKind::Native);
    let reply = executor
        .execute_transaction(call_message(200, &address, encode_call("get()", &[], &codec)))
        .await
        .expect("call runs");
    assert_eq!(
        reply.data.to_vec(),
        codec.encode(&[Value::String("persisted".to_string())])
    );
    executor.rollback(2).await.expect("rolled back");
}

#[tokio::test]
async fn rolled_back_block_leaves_no_trace() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend.clone());

    executor.begin_block(header(1)).await.expect("block opened");
    let deployed = executor
        .execute_transaction(deploy_message(100, b"hello:ghost"))
        .await
        .expect("deploy runs");
    let address = deployed.new_contract_address.clone();
    executor.prepare(1).await.expect("prepared");
    executor.rollback(1).await.expect("rolled back");

    executor.begin_block(header(2)).await.expect("block opened");
    let codec = Codec::new(VmKind::Native);
    let reply = executor
        .execute_transaction(call_message(200, &address, encode_call("get()", &[], &codec)))
        .await
        .expect("transaction runs");
    // the contract never made it to the backend
    assert_eq!(reply.ty, MessageType::Revert);
    executor.rollback(2).await.expect("rolled back");
}

#[tokio::test]
async fn commit_requires_open_block() {
    let backend = MemoryBackend::new();
    let executor = native_executor(backend);
    assert!(executor.commit(9).await.is_err());
}
