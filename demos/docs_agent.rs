use agent_lifecycle::{
    Agent, AgentBuilder, Engine, LargeLanguageModel, LlmError, Param, WorkflowOutcome,
    error, method,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
struct PullRequest {
    id: String,
    title: String,
    changed_files: Vec<String>,
}

#[derive(Debug)]
struct DocumentationAnalysis {
    reason: String,
    topics: Vec<&'static str>,
    priority: &'static str,
}

#[derive(Debug)]
struct DocumentationPullRequest {
    id: String,
    linked_pr: String,
    body: String,
    priority: &'static str,
}

/// Answers by keyword so the demo runs offline. Reviews of "flaky" pull
/// requests fail, to show a handler recovering.
struct KeywordModel;

impl LargeLanguageModel for KeywordModel {
    fn query_with(&self, prompt: &str, inputs: &[serde_json::Value]) -> Result<String, LlmError> {
        let pr = inputs.first().cloned().unwrap_or_default();
        if prompt.starts_with("Analyze") {
            let touches_api = pr["changed_files"].as_array().is_some_and(|files| {
                files
                    .iter()
                    .any(|f| f.as_str().is_some_and(|f| f.starts_with("src/api")))
            });
            let answer = if touches_api { "YES" } else { "NO" };
            return Ok(answer.to_string());
        }
        if prompt.starts_with("Review") {
            if pr["title"].as_str().is_some_and(|t| t.contains("flaky")) {
                return Err(LlmError::query("review model timed out"));
            }
            return Ok("LGTM".to_string());
        }
        Ok(format!("## Usage\n\nDocuments {}.", pr["title"]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct DocsAgent {
    reviewed: bool,
}

impl Agent for DocsAgent {
    fn declare(agent: AgentBuilder<Self>) -> AgentBuilder<Self> {
        agent
            .name("DocsAgent")
            .description("Monitors pull requests and automatically generates documentation updates")
            .trigger(
                method("detect_pull_request")
                    .param(Param::trigger::<PullRequest>())
                    .returns_void(|_, args| {
                        let pr = args.get::<PullRequest>(0)?;
                        println!("pull request detected: {} {:?}", pr.title, pr.changed_files);
                        Ok(())
                    }),
            )
            .decision(
                method("requires_documentation")
                    .param(Param::trigger::<PullRequest>())
                    .param(Param::llm())
                    .returns_object(|_, args| {
                        let pr = args.get::<PullRequest>(0)?;
                        let answer = args.llm(1)?.query_with_inputs(
                            "Analyze this pull request and answer YES if documentation is needed.",
                            &[pr],
                        )?;
                        if !answer.to_uppercase().contains("YES") {
                            println!("  no documentation required");
                            return Ok(None);
                        }
                        Ok(Some(DocumentationAnalysis {
                            reason: "pull request modifies user-facing API".into(),
                            topics: vec!["API Changes", "Usage Guide"],
                            priority: "high",
                        }))
                    }),
            )
            .action(
                method("produce_documentation")
                    .param(Param::trigger::<PullRequest>())
                    .param(Param::prior::<DocumentationAnalysis>())
                    .param(Param::llm())
                    .returns_object(|_, args| {
                        let pr = args.get::<PullRequest>(0)?;
                        let analysis = args.get::<DocumentationAnalysis>(1)?;
                        println!("  writing docs ({}): {:?}", analysis.reason, analysis.topics);
                        let body = args
                            .llm(2)?
                            .query_with_inputs("Generate documentation for these changes.", &[pr])?;
                        Ok(Some(DocumentationPullRequest {
                            id: format!("doc-{}", pr.id),
                            linked_pr: pr.id.clone(),
                            body,
                            priority: analysis.priority,
                        }))
                    }),
            )
            .action(
                method("review_documentation")
                    .param(Param::trigger::<PullRequest>())
                    .param(Param::prior::<DocumentationPullRequest>())
                    .param(Param::llm())
                    .returns_void(|me: &mut DocsAgent, args| {
                        let pr = args.get::<PullRequest>(0)?;
                        let doc = args.get::<DocumentationPullRequest>(1)?;
                        let verdict = args
                            .llm(2)?
                            .query_with_inputs("Review this documentation.", &[pr])?;
                        println!("  review of {}: {verdict}", doc.id);
                        me.reviewed = true;
                        Ok(())
                    }),
            )
            .outcome(
                method("apply_documentation")
                    .param(Param::prior::<DocumentationPullRequest>())
                    .returns_void(|me: &mut DocsAgent, args| {
                        let doc = args.get::<DocumentationPullRequest>(0)?;
                        let state = if me.reviewed { "reviewed" } else { "unreviewed" };
                        println!(
                            "  applying {} for {} ({state}, priority {}, {} bytes)",
                            doc.id,
                            doc.linked_pr,
                            doc.priority,
                            doc.body.len()
                        );
                        Ok(())
                    }),
            )
            .handle_exception(
                method("handle_documentation_exception")
                    .param(Param::exception(&error::ANY))
                    .param(Param::trigger::<PullRequest>())
                    .returns_void(|_, args| {
                        let err = args.error(0)?;
                        let pr = args.get::<PullRequest>(1)?;
                        eprintln!("  error during documentation workflow for {}: {err}", pr.id);
                        Ok(())
                    }),
            )
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let engine = Engine::builder()
        .register::<DocsAgent>()
        .llm(Arc::new(KeywordModel))
        .build()?;

    let prs = [
        PullRequest {
            id: "101".into(),
            title: "Fix typo in build script".into(),
            changed_files: vec!["build.rs".into()],
        },
        PullRequest {
            id: "102".into(),
            title: "Add pagination to list endpoint".into(),
            changed_files: vec!["src/api/list.rs".into()],
        },
        PullRequest {
            id: "103".into(),
            title: "Rework flaky auth endpoint".into(),
            changed_files: vec!["src/api/auth.rs".into()],
        },
    ];

    for pr in prs {
        match engine.start::<DocsAgent, _>(pr)? {
            WorkflowOutcome::Completed { .. } => println!("-> documentation applied"),
            WorkflowOutcome::Halted { .. } => println!("-> nothing to do"),
        }
    }
    Ok(())
}
