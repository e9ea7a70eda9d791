use agent_lifecycle::{
    Agent, AgentBuilder, Engine, LargeLanguageModel, LlmError, Param, Value, Verdict,
    WorkflowOutcome, method,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct BankTransaction {
    id: u32,
    account: String,
    amount_cents: u64,
    country: String,
}

#[derive(Debug, Deserialize)]
struct Fraud {
    fraud: bool,
    serious: bool,
    reason: String,
}

/// Stands in for a hosted model: flags large foreign transfers.
struct RuleModel;

impl LargeLanguageModel for RuleModel {
    fn query_with(&self, _prompt: &str, inputs: &[serde_json::Value]) -> Result<String, LlmError> {
        let tx = inputs.first().ok_or_else(|| LlmError::query("no transaction attached"))?;
        let amount = tx["amount_cents"].as_u64().unwrap_or(0);
        let foreign = tx["country"] != "US";
        let reply = serde_json::json!({
            "fraud": foreign && amount > 100_000,
            "serious": amount > 1_000_000,
            "reason": format!("{} transfer of {} cents", if foreign { "foreign" } else { "domestic" }, amount),
        });
        Ok(format!("```json\n{reply}\n```"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct FraudDetection;

impl Agent for FraudDetection {
    fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
        agent
            .name("FraudDetection")
            .description("Detects bank fraud transactions.")
            .trigger(
                method("handle_transaction")
                    .param(Param::trigger::<BankTransaction>())
                    .returns_void(|_, args| {
                        let tx = args.get::<BankTransaction>(0)?;
                        println!("transaction {} from {}", tx.id, tx.account);
                        Ok(())
                    }),
            )
            .decision(
                method("check_fraud")
                    .param(Param::llm())
                    .param(Param::trigger::<BankTransaction>())
                    .returns_verdict(|_, args| {
                        let tx = args.get::<BankTransaction>(1)?;
                        let fraud: Fraud = args.llm(0)?.query_as_with_inputs(
                            "Is this a fraudulent transaction? If so, how serious is it?",
                            &[tx],
                        )?;
                        Ok(if fraud.fraud {
                            Verdict::proceed(fraud)
                        } else {
                            Verdict::halt()
                        })
                    }),
            )
            .action(
                method("handle_fraud")
                    .param(Param::prior::<Fraud>())
                    .param(Param::trigger::<BankTransaction>())
                    .returns_void(|_, args| {
                        let fraud = args.get::<Fraud>(0)?;
                        let tx = args.get::<BankTransaction>(1)?;
                        if fraud.serious {
                            println!("  alerting bank security: {}", fraud.reason);
                        }
                        println!("  alerting customer {}", tx.account);
                        Ok(())
                    }),
            )
            .outcome(
                method("mark_transaction")
                    .param(Param::trigger::<BankTransaction>())
                    .returns_void(|_, args| {
                        println!("  transaction {} marked suspect", args.get::<BankTransaction>(0)?.id);
                        Ok(())
                    }),
            )
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let engine = Engine::builder()
        .register::<FraudDetection>()
        .llm(Arc::new(RuleModel))
        .with_tracing()
        .build()?;

    let transactions = [
        BankTransaction {
            id: 1,
            account: "alice".into(),
            amount_cents: 4_200,
            country: "US".into(),
        },
        BankTransaction {
            id: 2,
            account: "bob".into(),
            amount_cents: 2_500_000,
            country: "NL".into(),
        },
    ];

    for tx in transactions {
        match engine.start_workflow("FraudDetection", Value::new(tx))? {
            WorkflowOutcome::Completed { .. } => println!("-> fraud handled"),
            WorkflowOutcome::Halted { phase } => println!("-> clean (stopped at {phase})"),
        }
    }
    Ok(())
}
