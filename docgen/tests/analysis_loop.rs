//! Loop-level tests for the analysis session: turn accounting at the budget
//! boundary and the tool-call/tool-result pairing the model always sees.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use docgen::analysis::{AnalysisSession, NOT_EXECUTED, SessionSpec, SessionState, run_analysis};
use docgen::core::types::{Message, ModelReply, Role};
use docgen::core::validation::JsonSchemaValidator;
use docgen::errors::TurnsExhaustedError;
use docgen::io::cancel::CancelToken;
use docgen::io::prompt::{AnalysisPrompts, PromptEngine};
use docgen::test_support::{
    RecordedRequest, ScriptedModel, ScriptedOutcome, ScriptedToolHost, tool_call, tool_def,
};
use serde_json::{Value, json};

const VALID_ANSWER: &str = r#"{"summary": "two crates, one binary"}"#;

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["summary"],
        "properties": { "summary": { "type": "string", "minLength": 1 } }
    })
}

fn new_session(max_turns: u32) -> AnalysisSession {
    AnalysisSession::new(
        SessionSpec {
            agent: "project-scanner".to_string(),
            template: "summary".to_string(),
            source_path: PathBuf::from("/work/repo"),
            max_turns,
            params: BTreeMap::new(),
            schema: schema(),
        },
        &AnalysisPrompts {
            system: "You analyse repositories.".to_string(),
            user: "Summarize /work/repo.".to_string(),
        },
    )
}

fn tool_round(round: u32) -> ModelReply {
    ModelReply::tools(vec![
        tool_call(&format!("call-{round}-a"), "list_projects", json!({ "maxDepth": 2 })),
        tool_call(&format!("call-{round}-b"), "summarize_project", json!({ "path": "." })),
    ])
}

fn host() -> ScriptedToolHost {
    ScriptedToolHost::new(vec![tool_def("list_projects"), tool_def("summarize_project")])
        .with_outcome("list_projects", ScriptedOutcome::Success(r#"{"projects":[]}"#.to_string()))
}

/// Ids of tool calls in `messages` that have no matching tool result.
fn unanswered(messages: &[Message]) -> BTreeSet<String> {
    let mut pending = BTreeSet::new();
    for message in messages {
        match message.role {
            Role::Assistant => {
                pending.extend(message.tool_calls.iter().map(|call| call.id.clone()));
            }
            Role::Tool => {
                if let Some(id) = &message.tool_call_id {
                    pending.remove(id);
                }
            }
            _ => {}
        }
    }
    pending
}

fn assert_no_dangling(requests: &[RecordedRequest]) {
    for (idx, request) in requests.iter().enumerate() {
        let dangling = unanswered(&request.messages);
        assert!(dangling.is_empty(), "request {idx} had dangling calls: {dangling:?}");
    }
}

/// The model needs exactly `max_turns` tool rounds and then answers:
/// the session succeeds on call `max_turns + 1`.
#[test]
fn succeeds_when_required_rounds_equal_budget() {
    let max_turns = 3;
    let mut replies: Vec<ModelReply> = (0..max_turns).map(tool_round).collect();
    replies.push(ModelReply::text(VALID_ANSWER));
    let model = ScriptedModel::new(replies);
    let host = host();
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(max_turns);

    let success = run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect("analysis succeeds");

    assert_eq!(success.fields, json!({ "summary": "two crates, one binary" }));
    assert_eq!(success.turns_used, max_turns);
    assert_eq!(success.model_calls, max_turns + 1);
    assert_eq!(model.calls(), (max_turns + 1) as usize);
    assert_eq!(host.executions(), (max_turns * 2) as usize);
    assert_eq!(session.state(), &SessionState::Terminated);
    assert_no_dangling(&model.requests());
}

/// The model would need `max_turns + 1` rounds: the extra round is never
/// executed and the session ends turn-exhausted.
#[test]
fn exhausts_when_required_rounds_exceed_budget() {
    let max_turns = 3;
    let mut replies: Vec<ModelReply> = (0..=max_turns).map(tool_round).collect();
    replies.push(ModelReply::text(VALID_ANSWER));
    let model = ScriptedModel::new(replies);
    let host = host();
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(max_turns);

    let err = run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect_err("budget exhausted");

    let exhausted = err.downcast_ref::<TurnsExhaustedError>().expect("turns exhausted");
    assert_eq!(exhausted.max_turns, max_turns);
    assert_eq!(exhausted.model_calls, max_turns + 1);
    assert_eq!(
        exhausted.unexecuted_calls,
        vec!["list_projects".to_string(), "summarize_project".to_string()]
    );
    assert_eq!(model.calls(), (max_turns + 1) as usize);
    assert_eq!(host.executions(), (max_turns * 2) as usize);

    let messages = session.conversation().messages();
    assert!(unanswered(messages).is_empty());
    let last = messages.last().expect("messages");
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.content, format!("ERROR: {NOT_EXECUTED}"));
    assert_no_dangling(&model.requests());
}

#[test]
fn always_calling_tools_stops_after_two_rounds() {
    let model = ScriptedModel::repeating(tool_round(0));
    let host = host();
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(2);

    let err = run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect_err("budget exhausted");

    assert!(err.downcast_ref::<TurnsExhaustedError>().is_some());
    assert_eq!(model.calls(), 3);
    assert_eq!(host.executions(), 4);
    assert_eq!(session.turns_used(), 2);
    assert_eq!(session.conversation().tool_result_count(), 6);
}

#[test]
fn tool_errors_are_fed_back_and_loop_continues() {
    let model = ScriptedModel::new(vec![
        ModelReply::tools(vec![tool_call("c1", "summarize_project", json!({ "path": "missing" }))]),
        ModelReply::text(VALID_ANSWER),
    ]);
    let host = host().with_outcome(
        "summarize_project",
        ScriptedOutcome::Error("project missing is not a directory".to_string()),
    );
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(4);

    run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect("analysis succeeds");

    let second = &model.requests()[1].messages;
    let result = second
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("tool result");
    assert_eq!(result.tool_call_id.as_deref(), Some("c1"));
    assert!(result.content.contains("not a directory"));
}

#[test]
fn tool_calls_run_in_emission_order() {
    let model = ScriptedModel::new(vec![
        ModelReply::tools(vec![
            tool_call("z", "summarize_project", json!({ "path": "b" })),
            tool_call("a", "list_projects", json!({})),
            tool_call("m", "summarize_project", json!({ "path": "a" })),
        ]),
        ModelReply::text(VALID_ANSWER),
    ]);
    let host = host();
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(2);

    run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect("analysis succeeds");

    let ids: Vec<String> = host.executed().into_iter().map(|call| call.id).collect();
    assert_eq!(ids, vec!["z", "a", "m"]);
    let requests = model.requests();
    let result_ids: Vec<&str> = requests[1]
        .messages
        .iter()
        .filter_map(|message| message.tool_call_id.as_deref())
        .collect();
    assert_eq!(result_ids, vec!["z", "a", "m"]);
}

#[test]
fn cancellation_during_tool_round_stops_the_session() {
    let model = ScriptedModel::repeating(tool_round(0));
    let host = host().with_outcome("list_projects", ScriptedOutcome::Cancel);
    let prompts = PromptEngine::new().expect("prompts");
    let cancel = CancelToken::new();
    let mut session = new_session(5);

    let err = run_analysis(&mut session, &model, &host, &JsonSchemaValidator, &prompts, &cancel)
        .expect_err("cancelled");

    assert!(err.downcast_ref::<docgen::errors::Cancelled>().is_some());
    assert_eq!(model.calls(), 1);
    assert_eq!(host.executions(), 1);
}

#[test]
fn every_request_advertises_the_tools() {
    let model = ScriptedModel::new(vec![tool_round(0), ModelReply::text(VALID_ANSWER)]);
    let host = host();
    let prompts = PromptEngine::new().expect("prompts");
    let mut session = new_session(2);

    run_analysis(
        &mut session,
        &model,
        &host,
        &JsonSchemaValidator,
        &prompts,
        &CancelToken::new(),
    )
    .expect("analysis succeeds");

    for request in model.requests() {
        let names: Vec<&str> = request.tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["list_projects", "summarize_project"]);
    }
    let first = &model.requests()[0].messages;
    assert_eq!(first[0].role, Role::System);
    assert_eq!(first[1].role, Role::User);
}
