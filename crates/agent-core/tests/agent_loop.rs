//! End-to-end behavior of the agent loop against a scripted backend.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use agent_core::mock::MockProvider;
use agent_core::plugin::StaticToolkit;
use agent_core::provider::Completion;
use agent_core::{
    Agent, AgentError, Executor, FnTool, ParamType, PluginManager, ProviderToolCall, Role,
    StaticBundleSource, Task, TaskStatus, TokioExecutor, ToolParameter, ToolRegistry,
};
use serde_json::{Value, json};

fn call(id: &str, name: &str, arguments: Value) -> ProviderToolCall {
    ProviderToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

fn sleepy_tool(name: &str, millis: u64) -> FnTool {
    FnTool::builder(name).build_async(move |_| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok::<_, anyhow::Error>(format!("slept {millis}ms"))
    })
}

#[tokio::test]
async fn plain_answer_appends_two_messages() {
    let provider = Arc::new(MockProvider::new().then_text("Hi there!"));
    let mut agent = Agent::builder().provider(provider).build().unwrap();

    let answer = agent.run("hello").await.unwrap();

    assert_eq!(answer, "Hi there!");
    let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant]);
    assert_eq!(agent.messages()[0].content, "hello");
    assert_eq!(agent.messages()[1].content, "Hi there!");
}

#[tokio::test]
async fn weather_round_trip() {
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("call_1", "getWeather", r#"{"city":"Paris"}"#)
            .then_text("It is sunny."),
    );
    let weather = FnTool::builder("getWeather")
        .description("Look up the weather")
        .param(ToolParameter::required("city", ParamType::Text, "City"))
        .build_sync(|args| {
            Ok::<_, anyhow::Error>(json!({ "city": args["city"], "sky": "clear" }))
        });
    let mut agent = Agent::builder()
        .provider(provider.clone())
        .tool(weather)
        .build()
        .unwrap();

    let answer = agent.run("weather?").await.unwrap();
    assert_eq!(answer, "It is sunny.");

    let log = agent.messages();
    let roles: Vec<Role> = log.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

    let marker = log[1].tool_calls().unwrap();
    assert_eq!(marker[0]["name"], "getWeather");
    assert_eq!(log[2].tool_call_id(), Some("call_1"));
    assert_eq!(log[2].content, r#"{"city":"Paris","sky":"clear"}"#);

    // The second request carries the tool result back to the model
    let second = &provider.requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[2].role, Role::Tool);
}

/// Sync tools that each wait up to two seconds for every other party to
/// arrive, answering "met" if they all did.
fn rendezvous_agent(parties: usize) -> Agent {
    let arrived = Arc::new((Mutex::new(0_usize), Condvar::new()));
    let calls = (0..parties)
        .map(|i| call(&format!("call_{i}"), &format!("party_{i}"), json!({})))
        .collect();
    let provider = Arc::new(
        MockProvider::new()
            .then(Completion::tool_calls(calls))
            .then_text("everyone met"),
    );

    let mut builder = Agent::builder().provider(provider);
    for i in 0..parties {
        let arrived = Arc::clone(&arrived);
        builder = builder.tool(FnTool::builder(format!("party_{i}")).build_sync(move |_| {
            let (count, all_in) = &*arrived;
            let mut guard = count.lock().unwrap();
            *guard += 1;
            all_in.notify_all();
            let (guard, _) = all_in
                .wait_timeout_while(guard, Duration::from_secs(2), |n| *n < parties)
                .unwrap();
            Ok::<_, anyhow::Error>(if *guard >= parties { "met" } else { "alone" })
        }));
    }
    builder.build().unwrap()
}

fn tool_contents(agent: &Agent) -> Vec<&str> {
    agent
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect()
}

#[tokio::test]
async fn unknown_tool_is_reported_and_loop_continues() {
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("call_1", "nope", "{}")
            .then_text("I could not find that tool."),
    );
    let mut agent = Agent::builder().provider(provider).build().unwrap();

    let answer = agent.run("do the thing").await.unwrap();

    assert_eq!(answer, "I could not find that tool.");
    assert_eq!(agent.messages()[2].content, "Error: Tool 'nope' not found");
}

#[tokio::test]
async fn unknown_tool_wins_over_malformed_arguments() {
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("call_1", "nope", "{oops")
            .then_text("No such tool."),
    );
    let mut agent = Agent::builder().provider(provider).build().unwrap();

    agent.run("do the thing").await.unwrap();
    assert_eq!(agent.messages()[2].content, "Error: Tool 'nope' not found");
}

#[tokio::test]
async fn handler_error_naming_another_tool_is_an_execution_failure() {
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("call_1", "proxy", "{}")
            .then_text("The proxy failed."),
    );
    let proxy = FnTool::builder("proxy").build_sync(|_| -> anyhow::Result<Value> {
        Err(AgentError::ToolNotFound("inner".into()).into())
    });
    let mut agent = Agent::builder()
        .provider(provider)
        .tool(proxy)
        .build()
        .unwrap();

    agent.run("go").await.unwrap();
    assert_eq!(
        agent.messages()[2].content,
        "Error executing proxy: Tool 'inner' not found"
    );
}

#[tokio::test]
async fn sync_tools_in_one_turn_overlap() {
    let mut agent = rendezvous_agent(3);

    assert_eq!(agent.run("meet").await.unwrap(), "everyone met");
    assert_eq!(tool_contents(&agent), ["met", "met", "met"]);
}

#[test]
fn sync_tools_overlap_under_run_blocking() {
    let mut agent = rendezvous_agent(3);

    assert_eq!(agent.run_blocking("meet").unwrap(), "everyone met");
    assert_eq!(tool_contents(&agent), ["met", "met", "met"]);
}

#[tokio::test]
async fn failing_tool_is_reported_with_its_name() {
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("call_1", "divide", r#"{"a":1,"b":0}"#)
            .then_text("Division failed."),
    );
    let divide = FnTool::builder("divide").build_sync(|_| -> anyhow::Result<Value> {
        anyhow::bail!("division by zero")
    });
    let mut agent = Agent::builder()
        .provider(provider)
        .tool(divide)
        .build()
        .unwrap();

    agent.run("1/0").await.unwrap();
    assert_eq!(
        agent.messages()[2].content,
        "Error executing divide: division by zero"
    );
}

#[tokio::test(start_paused = true)]
async fn tool_messages_follow_request_order() {
    let provider = Arc::new(
        MockProvider::new()
            .then(Completion::tool_calls(vec![
                call("a", "slow", json!({})),
                call("b", "medium", json!({})),
                call("c", "fast", json!({})),
            ]))
            .then_text("done"),
    );
    let mut agent = Agent::builder()
        .provider(provider)
        .tool(sleepy_tool("slow", 30))
        .tool(sleepy_tool("medium", 20))
        .tool(sleepy_tool("fast", 10))
        .build()
        .unwrap();

    agent.run("go").await.unwrap();

    let ids: Vec<&str> = agent
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(agent.messages()[2].content, "slept 30ms");
}

#[tokio::test]
async fn batch_failure_is_isolated() {
    let executor = TokioExecutor::new();
    let tasks = vec![
        Task::blocking("first", |_| Ok(json!(1))),
        Task::blocking("second", |_| Err(anyhow::anyhow!("exploded"))),
        Task::future("third", |_| async { Ok(json!(3)) }),
    ];

    let done = executor.run_batch(tasks).await;

    let statuses: Vec<TaskStatus> = done.iter().map(Task::status).collect();
    assert_eq!(
        statuses,
        [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Completed]
    );
    assert!(!done[1].error().unwrap().is_empty());
    assert_eq!(done[0].result(), Some(&json!(1)));
    assert_eq!(done[2].result(), Some(&json!(3)));
}

#[test]
fn duplicate_registration_keeps_original() {
    let registry = ToolRegistry::new();
    registry
        .register(FnTool::builder("search").description("first").build_sync(|_| Ok::<_, anyhow::Error>("1")))
        .unwrap();

    let err = registry
        .register(FnTool::builder("search").description("second").build_sync(|_| Ok::<_, anyhow::Error>("2")))
        .unwrap_err();

    assert!(matches!(err, AgentError::DuplicateTool(ref name) if name == "search"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("search").unwrap().description(), "first");
}

#[tokio::test]
async fn broken_bundle_does_not_block_others() {
    let good = StaticToolkit::new("good")
        .with_tool(FnTool::builder("echo").build_sync(|args| Ok::<_, anyhow::Error>(Value::Object(args))));
    let source = StaticBundleSource::new()
        .loader("broken", || Err(AgentError::Other("missing dependency".into())))
        .toolkit(Arc::new(good));

    let mut plugins = PluginManager::default().with_source(Arc::new(source));
    plugins.discover().await;
    assert_eq!(plugins.loaded_names(), ["good"]);

    let registry = Arc::new(ToolRegistry::new());
    let report = plugins.register_tools(&registry).await;
    assert!(report.is_clean());
    assert!(registry.contains("echo"));

    // Loaded tools are usable by an agent sharing the registry
    let provider = Arc::new(
        MockProvider::new()
            .then_tool_call("1", "echo", r#"{"x":1}"#)
            .then_text("ok"),
    );
    let mut agent = Agent::builder()
        .provider(provider)
        .registry(registry)
        .build()
        .unwrap();
    agent.run("echo").await.unwrap();
    assert_eq!(agent.messages()[2].content, r#"{"x":1}"#);
}
