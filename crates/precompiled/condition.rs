use std::sync::Mutex;

use async_trait::async_trait;
use tabrex_common::{CallResult, Condition};

use crate::codec::{ParamType, Value};
use crate::error::PrecompiledError;
use crate::gas::{GasPricer, InterfaceOpcode};
use crate::registry::{Precompiled, PrecompiledContext};
use crate::utils::{func_selector, split_param};

/// Transient filter under construction by contract code: comparator
/// clauses plus an optional result window. Integer literals are stored
/// as decimal strings, matching the table encoding.
pub struct ConditionPrecompiled {
    condition: Mutex<Condition>,
}

impl ConditionPrecompiled {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition: Mutex::new(condition),
        }
    }

    pub fn snapshot(&self) -> Condition {
        self.condition
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn apply(&self, f: impl FnOnce(&mut Condition)) {
        let mut condition = self
            .condition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut condition);
    }
}

fn int_literal(word: &ethereum_types::U256) -> String {
    if word.bit(255) {
        let magnitude = (!*word).overflowing_add(ethereum_types::U256::one()).0;
        format!("-{magnitude}")
    } else {
        word.to_string()
    }
}

#[async_trait]
impl Precompiled for ConditionPrecompiled {
    async fn call(
        &self,
        ctx: &PrecompiledContext,
        param: &[u8],
        _origin: &str,
        _sender: &str,
        _gas_left: i64,
    ) -> Result<CallResult, PrecompiledError> {
        let (selector, data) = split_param(param)?;
        let codec = ctx.codec();
        let mut pricer = GasPricer::new();
        pricer.set_mem_used(param.len());

        // (signature, opcode, apply) per comparator; string and int256
        // literal overloads share the clause builder
        let string_ops: [(&str, InterfaceOpcode, fn(&mut Condition, String, String)); 2] = [
            ("EQ(string,string)", InterfaceOpcode::Eq, |c, f, v| {
                c.eq(f, v);
            }),
            ("NE(string,string)", InterfaceOpcode::Ne, |c, f, v| {
                c.ne(f, v);
            }),
        ];
        let int_ops: [(&str, InterfaceOpcode, fn(&mut Condition, String, String)); 6] = [
            ("EQ(string,int256)", InterfaceOpcode::Eq, |c, f, v| {
                c.eq(f, v);
            }),
            ("NE(string,int256)", InterfaceOpcode::Ne, |c, f, v| {
                c.ne(f, v);
            }),
            ("GT(string,int256)", InterfaceOpcode::Gt, |c, f, v| {
                c.gt(f, v);
            }),
            ("GE(string,int256)", InterfaceOpcode::Ge, |c, f, v| {
                c.ge(f, v);
            }),
            ("LT(string,int256)", InterfaceOpcode::Lt, |c, f, v| {
                c.lt(f, v);
            }),
            ("LE(string,int256)", InterfaceOpcode::Le, |c, f, v| {
                c.le(f, v);
            }),
        ];

        for (signature, opcode, apply) in string_ops {
            if selector == func_selector(signature) {
                let args = codec.decode(data, &[ParamType::String, ParamType::String])?;
                let (Value::String(field), Value::String(value)) = (&args[0], &args[1]) else {
                    return Err(PrecompiledError::InvalidArgument("condition clause".into()));
                };
                self.apply(|c| apply(c, field.clone(), value.clone()));
                pricer.append_operation(opcode, 1);
                return Ok(CallResult::ok(Vec::new(), pricer.total_gas()));
            }
        }

        for (signature, opcode, apply) in int_ops {
            if selector == func_selector(signature) {
                let args = codec.decode(data, &[ParamType::String, ParamType::Int])?;
                let (Value::String(field), Value::Int(word)) = (&args[0], &args[1]) else {
                    return Err(PrecompiledError::InvalidArgument("condition clause".into()));
                };
                self.apply(|c| apply(c, field.clone(), int_literal(word)));
                pricer.append_operation(opcode, 1);
                return Ok(CallResult::ok(Vec::new(), pricer.total_gas()));
            }
        }

        if selector == func_selector("limit(int256)") {
            let args = codec.decode(data, &[ParamType::Int])?;
            let Value::Int(count) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("limit".into()));
            };
            let count = count.low_u64() as usize;
            self.apply(|c| c.set_limit(0, count));
            pricer.append_operation(InterfaceOpcode::Limit, 1);
            return Ok(CallResult::ok(Vec::new(), pricer.total_gas()));
        }

        if selector == func_selector("limit(int256,int256)") {
            let args = codec.decode(data, &[ParamType::Int, ParamType::Int])?;
            let (Value::Int(offset), Value::Int(count)) = (&args[0], &args[1]) else {
                return Err(PrecompiledError::InvalidArgument("limit".into()));
            };
            let offset = offset.low_u64() as usize;
            let count = count.low_u64() as usize;
            self.apply(|c| c.set_limit(offset, count));
            pricer.append_operation(InterfaceOpcode::Limit, 1);
            return Ok(CallResult::ok(Vec::new(), pricer.total_gas()));
        }

        Err(PrecompiledError::UnknownFunction {
            target: "Condition".to_string(),
            selector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabrex_common::Comparator;

    #[test]
    fn clauses_accumulate() {
        let condition = ConditionPrecompiled::new(Condition::new());
        condition.apply(|c| {
            c.eq("name", "fruit");
        });
        condition.apply(|c| {
            c.gt("item_id", "0");
        });
        let snapshot = condition.snapshot();
        assert_eq!(snapshot.triples.len(), 2);
        assert_eq!(snapshot.triples[1].cmp, Comparator::Gt);
    }

    #[test]
    fn negative_literal_renders_signed() {
        let word = (!ethereum_types::U256::from(42)).overflowing_add(1.into()).0;
        assert_eq!(int_literal(&word), "-42");
    }
}
