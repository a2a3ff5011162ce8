//! End-to-end scenarios exercising the full mesh pipeline rather than a
//! single module in isolation.

use agentmesh::{
    task_topic, Agent, AgentContext, AgentId, AgentRegistry, Broker, Event, FallbackConfig,
    InMemoryBroker, MockLlmClient, Orchestrator, OrchestratorConfig, ResponseCacheConfig,
    TaskRequest, TaskResponse,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A minimal responder: replies to any `task.weather.current` request with a
/// canned forecast, regardless of agent registry plumbing — enough to drive
/// the coordinator/orchestrator without needing a full registered agent.
struct WeatherResponder {
    broker: Arc<dyn Broker>,
}

#[async_trait]
impl agentmesh::EventSubscriber for WeatherResponder {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        let req: TaskRequest = serde_json::from_value(event.payload).map_err(|e| e.to_string())?;
        let location = req
            .parameters
            .get("request")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let response = TaskResponse::ok(
            req.task_id,
            serde_json::json!({ "forecast": "sunny", "source_request": location }),
            3,
        );
        let reply = Event::new(req.reply_topic, serde_json::to_value(&response).unwrap());
        self.broker.publish(reply).await.map_err(|e| e.to_string())
    }
}

#[tokio::test]
async fn s1_simple_weather_route_produces_a_non_empty_answer() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    broker
        .subscribe(
            AgentId::new("weather-agent"),
            &task_topic("weather.current"),
            Arc::new(WeatherResponder { broker: broker.clone() }),
        )
        .await
        .unwrap();

    // Two scripted replies: the planner's JSON-plan request consumes the
    // first (deliberately not valid JSON, so planning falls back to the
    // keyword router), and the synthesis call afterward consumes the second.
    let llm = Arc::new(MockLlmClient::new(vec![
        Ok("not a json plan".to_string()),
        Ok("It's sunny in London right now.".to_string()),
    ]));
    let tmp = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        broker,
        llm,
        OrchestratorConfig::default(),
        ResponseCacheConfig::default(),
        FallbackConfig {
            rules_dir: tmp.path().to_path_buf(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let answer = orchestrator
        .orchestrate("What's the weather in London?", None)
        .await
        .unwrap();

    assert!(!answer.is_empty());
    assert_eq!(answer, "It's sunny in London right now.");
}

#[tokio::test]
async fn s2_llm_unavailable_routes_through_keyword_fallback() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    broker
        .subscribe(
            AgentId::new("finance-agent"),
            &task_topic("finance.quote"),
            Arc::new(WeatherResponder { broker: broker.clone() }), // any responder will do; shape matches
        )
        .await
        .unwrap();

    // MockLlmClient with no scripted responses always errors -> planner falls back.
    let llm = Arc::new(MockLlmClient::new(vec![]));
    let tmp = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        broker,
        llm,
        OrchestratorConfig::default(),
        ResponseCacheConfig::default(),
        FallbackConfig {
            rules_dir: tmp.path().to_path_buf(),
            min_confidence: 0,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // synthesis also uses the same (exhausted) mock LLM, so it will fail too;
    // with min_confidence 0 but no learned rules yet, orchestrate should still
    // surface the raw workflow result rather than erroring outright, since the
    // *task* dispatch itself succeeded even though no synthesis/fallback text exists.
    let result = orchestrator.orchestrate("stock price of AAPL", None).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn s6_wildcard_subscription_matches_prefix_but_not_unrelated_topic() {
    let broker = InMemoryBroker::default();
    let received = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    struct Recorder(Arc<tokio::sync::Mutex<Vec<String>>>);
    #[async_trait]
    impl agentmesh::EventSubscriber for Recorder {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.0.lock().await.push(event.topic);
            Ok(())
        }
    }

    broker
        .subscribe(
            AgentId::new("watcher"),
            "orchestrator.**",
            Arc::new(Recorder(received.clone())),
        )
        .await
        .unwrap();

    broker
        .publish(Event::new("orchestrator.task.request", serde_json::json!({})))
        .await
        .unwrap();
    broker
        .publish(Event::new("orchestrator.status", serde_json::json!({})))
        .await
        .unwrap();
    broker
        .publish(Event::new("other.topic", serde_json::json!({})))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut got = received.lock().await.clone();
    got.sort();
    assert_eq!(
        got,
        vec!["orchestrator.status".to_string(), "orchestrator.task.request".to_string()]
    );
}

#[tokio::test]
async fn registry_discover_surfaces_only_active_agents_with_matching_capability() {
    struct Silent(AgentId);
    #[async_trait]
    impl Agent for Silent {
        fn id(&self) -> &AgentId {
            &self.0
        }
        async fn handle_event(&self, _ctx: &AgentContext, _event: Event) -> Result<(), String> {
            Ok(())
        }
    }

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let registry = AgentRegistry::new(broker);

    registry
        .register(agentmesh::AgentDefinition {
            name: "weather".to_string(),
            factory: Arc::new(|id| Arc::new(Silent(id))),
            description: "reports weather".to_string(),
            capabilities: vec!["weather.current".to_string()],
        })
        .await
        .unwrap();

    registry.activate("weather", AgentId::new("weather-1")).await.unwrap();

    let found = registry.discover("weather.current").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].agent_id, AgentId::new("weather-1"));

    registry.deactivate(&AgentId::new("weather-1")).await.unwrap();
    assert!(registry.discover("weather.current").await.is_empty());
}
