//! Scripted interpreter stand-ins. The real bytecode machines are
//! external; these drive the host interface the way contract code
//! would, keyed on a tag at the start of the deployed blob.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::U256;
use tabrex_common::VmKind;
use tabrex_executor::{
    CallRequest, ExecutorError, HostContext, Vm, VmInput, VmOutcome,
};
use tabrex_precompiled::{func_selector, Codec, ParamType, Value};

const CALL_GAS_COST: i64 = 1000;

/// Opt-in log output for debugging test runs: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub struct ScriptedVm {
    vm_kind: VmKind,
}

impl ScriptedVm {
    pub fn new(vm_kind: VmKind) -> Self {
        Self { vm_kind }
    }

    fn codec(&self) -> Codec {
        Codec::new(self.vm_kind)
    }
}

fn selector_of(data: &[u8]) -> u32 {
    if data.len() < 4 {
        return 0;
    }
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn finished(output: Vec<u8>, gas: i64) -> Result<VmOutcome, ExecutorError> {
    Ok(VmOutcome::Finished {
        output: Bytes::from(output),
        gas_left: gas - CALL_GAS_COST,
    })
}

#[async_trait]
impl Vm for ScriptedVm {
    async fn execute(
        &self,
        host: &mut dyn HostContext,
        input: VmInput,
    ) -> Result<VmOutcome, ExecutorError> {
        if input.gas < CALL_GAS_COST {
            return Err(ExecutorError::OutOfGas);
        }
        let codec = self.codec();

        if let Some(greeting) = input.code.strip_prefix(b"hello:".as_ref()) {
            return self.run_hello(host, &input, greeting.to_vec(), &codec).await;
        }
        if input.code.as_ref() == b"factory" {
            return self.run_factory(host, &input, &codec).await;
        }
        if let Some(value) = input.code.strip_prefix(b"valuekeeper:".as_ref()) {
            return self.run_valuekeeper(host, &input, value.to_vec(), &codec).await;
        }
        if input.code.as_ref() == b"flaky" {
            return self.run_flaky(host, &input).await;
        }
        if input.code.as_ref() == b"transfer" {
            return self.run_transfer(host, &input, &codec).await;
        }
        Err(ExecutorError::Revert(format!(
            "unknown code blob at {}",
            input.address
        )))
    }
}

impl ScriptedVm {
    // constructor stores its argument; get() returns it ABI-encoded
    async fn run_hello(
        &self,
        host: &mut dyn HostContext,
        input: &VmInput,
        greeting: Vec<u8>,
        codec: &Codec,
    ) -> Result<VmOutcome, ExecutorError> {
        if input.create {
            host.set_storage("value", Bytes::from(greeting)).await?;
            return finished(Vec::new(), input.gas);
        }
        if selector_of(&input.data) == func_selector("get()") {
            let stored = host.get_storage("value").await?;
            let text = String::from_utf8(stored.to_vec())
                .map_err(|_| ExecutorError::Revert("corrupt greeting".into()))?;
            return finished(codec.encode(&[Value::String(text)]), input.gas);
        }
        Err(ExecutorError::Revert("unknown function".into()))
    }

    // createAndCallB(int256): deploys a valuekeeper with the argument,
    // then calls value() on it and forwards the child output
    async fn run_factory(
        &self,
        host: &mut dyn HostContext,
        input: &VmInput,
        codec: &Codec,
    ) -> Result<VmOutcome, ExecutorError> {
        if input.create {
            return finished(Vec::new(), input.gas);
        }
        if selector_of(&input.data) == func_selector("createAndCallB(int256)") {
            let args = codec.decode(&input.data[4..], &[ParamType::Int])?;
            let Value::Int(v) = &args[0] else {
                return Err(ExecutorError::Revert("bad argument".into()));
            };

            let mut blob = b"valuekeeper:".to_vec();
            blob.extend_from_slice(v.to_string().as_bytes());
            let deploy = host
                .call(CallRequest {
                    to: String::new(),
                    data: Bytes::from(blob),
                    gas: input.gas / 2,
                    create: true,
                    create_salt: None,
                    static_call: false,
                })
                .await?;
            if deploy.status != 0 {
                return Err(ExecutorError::Revert("child deploy failed".into()));
            }

            let mut call_data = func_selector("value()").to_be_bytes().to_vec();
            call_data.extend_from_slice(&codec.encode(&[]));
            let response = host
                .call(CallRequest {
                    to: deploy.new_contract_address,
                    data: Bytes::from(call_data),
                    gas: input.gas / 4,
                    create: false,
                    create_salt: None,
                    static_call: false,
                })
                .await?;
            if response.status != 0 {
                return Err(ExecutorError::Revert("child call failed".into()));
            }
            return finished(response.output.to_vec(), input.gas);
        }
        Err(ExecutorError::Revert("unknown function".into()))
    }

    async fn run_valuekeeper(
        &self,
        host: &mut dyn HostContext,
        input: &VmInput,
        value: Vec<u8>,
        codec: &Codec,
    ) -> Result<VmOutcome, ExecutorError> {
        if input.create {
            host.set_storage("value", Bytes::from(value)).await?;
            return finished(Vec::new(), input.gas);
        }
        if selector_of(&input.data) == func_selector("value()") {
            let stored = host.get_storage("value").await?;
            let text = String::from_utf8(stored.to_vec()).unwrap_or_default();
            let word = U256::from_dec_str(&text).unwrap_or_default();
            return finished(codec.encode(&[Value::Int(word)]), input.gas);
        }
        Err(ExecutorError::Revert("unknown function".into()))
    }

    // bump() writes then throws; counter() reads the slot back raw
    async fn run_flaky(
        &self,
        host: &mut dyn HostContext,
        input: &VmInput,
    ) -> Result<VmOutcome, ExecutorError> {
        if input.create {
            return finished(Vec::new(), input.gas);
        }
        if selector_of(&input.data) == func_selector("bump()") {
            host.set_storage("counter", Bytes::from_static(b"100")).await?;
            return Err(ExecutorError::Revert("bump always throws".into()));
        }
        if selector_of(&input.data) == func_selector("counter()") {
            let stored = host.get_storage("counter").await?;
            return finished(stored.to_vec(), input.gas);
        }
        Err(ExecutorError::Revert("unknown function".into()))
    }

    // balance ledger keyed by account name, u32 amounts as decimal text
    async fn run_transfer(
        &self,
        host: &mut dyn HostContext,
        input: &VmInput,
        codec: &Codec,
    ) -> Result<VmOutcome, ExecutorError> {
        async fn balance_of(
            host: &mut dyn HostContext,
            account: &str,
        ) -> Result<u64, ExecutorError> {
            let stored = host.get_storage(account).await?;
            Ok(std::str::from_utf8(&stored)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0))
        }

        async fn store_balance(
            host: &mut dyn HostContext,
            account: &str,
            amount: u64,
        ) -> Result<(), ExecutorError> {
            host.set_storage(account, Bytes::from(amount.to_string().into_bytes()))
                .await
        }

        if input.create {
            return finished(Vec::new(), input.gas);
        }
        let selector = selector_of(&input.data);

        if selector == func_selector("set(string,uint32)") {
            let args = codec.decode(&input.data[4..], &[ParamType::String, ParamType::Uint])?;
            let (Value::String(account), Value::Uint(amount)) = (&args[0], &args[1]) else {
                return Err(ExecutorError::Revert("bad arguments".into()));
            };
            store_balance(host, account, amount.low_u64()).await?;
            return finished(codec.encode(&[Value::Bool(true)]), input.gas);
        }

        if selector == func_selector("transfer(string,string,uint32)") {
            let args = codec.decode(
                &input.data[4..],
                &[ParamType::String, ParamType::String, ParamType::Uint],
            )?;
            let (Value::String(from), Value::String(to), Value::Uint(amount)) =
                (&args[0], &args[1], &args[2])
            else {
                return Err(ExecutorError::Revert("bad arguments".into()));
            };
            let amount = amount.low_u64();

            let from_balance = balance_of(host, from).await?;
            if from_balance < amount {
                return Err(ExecutorError::Revert(format!("{from} has {from_balance}")));
            }
            let to_balance = balance_of(host, to).await?;
            store_balance(host, from, from_balance - amount).await?;
            store_balance(host, to, to_balance + amount).await?;
            return finished(codec.encode(&[Value::Bool(true)]), input.gas);
        }

        if selector == func_selector("query(string)") {
            let args = codec.decode(&input.data[4..], &[ParamType::String])?;
            let Value::String(account) = &args[0] else {
                return Err(ExecutorError::Revert("bad arguments".into()));
            };
            let balance = balance_of(host, account).await?;
            return finished(codec.encode(&[Value::Uint(balance.into())]), input.gas);
        }

        Err(ExecutorError::Revert("unknown function".into()))
    }
}
