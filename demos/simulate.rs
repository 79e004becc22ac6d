//! Drive a small flow through the in-memory engine and print what the
//! channel gateway would receive.

use std::sync::Arc;

use botflow_core::config::Config;
use botflow_core::flow::FlowGraph;
use botflow_core::integrations::HttpAdapter;
use botflow_core::store::MemoryStore;
use botflow_core::{Engine, InboundEvent};

const FLOW: &str = r#"{
    "name": "atendimento",
    "nodes": [
        {"id": "start", "type": "start"},
        {"id": "hello", "type": "bubble_text", "text": "Olá {{nome}}! Bem-vindo."},
        {"id": "menu", "type": "input_buttons", "prompt": "Como podemos ajudar?", "variable": "assunto",
         "choices": [
            {"id": "pedido", "label": "Meu pedido"},
            {"id": "humano", "label": "Falar com atendente"}
         ]},
        {"id": "order", "type": "input_number", "prompt": "Qual o número do pedido?", "variable": "pedido",
         "min": 1, "retry_message": "Digite apenas o número do pedido."},
        {"id": "thanks", "type": "bubble_text", "text": "Pedido {{pedido}} localizado."},
        {"id": "agent", "type": "transfer", "message": "Transferindo...", "queue": "suporte"},
        {"id": "end", "type": "end_chat", "message": "Até logo, {{nome}}!"}
    ],
    "edges": [
        {"from": "start", "to": "hello"},
        {"from": "hello", "to": "menu"},
        {"from": "menu", "to": "order", "branch_label": "pedido"},
        {"from": "menu", "to": "agent", "branch_label": "humano"},
        {"from": "menu", "to": "agent", "branch_label": "default"},
        {"from": "order", "to": "thanks"},
        {"from": "thanks", "to": "end"}
    ]
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("botflow_core=debug")
        .init();

    let mut config = Config::default();
    config
        .channels
        .insert("whatsapp".to_string(), "atendimento".to_string());

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::in_memory(config, store, Arc::new(HttpAdapter::new()));

    let published = engine
        .flows()
        .publish("atendimento", &FlowGraph::from_json(FLOW)?)
        .await?;
    println!("Published {} v{}\n", published.flow_id, published.version);

    let mut variables = botflow_core::Variables::new();
    variables.insert("nome".to_string(), serde_json::json!("Ana"));

    let script = ["oi", "Meu pedido", "abc", "1234"];
    for (i, text) in script.iter().enumerate() {
        let mut event = InboundEvent::message("5511999990000", "whatsapp", text)
            .with_event_id(format!("wamid-{}", i));
        if i == 0 {
            event = event.with_variables(variables.clone());
        }

        println!("> {}", text);
        let outcome = engine.handle_inbound(event).await?;
        for action in &outcome.actions {
            println!("< [{:?}] {}", action.kind, action.content);
        }
        println!("  ({})\n", outcome.status);
    }

    Ok(())
}
