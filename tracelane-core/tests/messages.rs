use serde_json::json;
use tracelane_core::{messages_to_value, ChatMessage, ToolCall};

#[test]
fn every_role_has_a_wire_form() {
    let messages = vec![
        ChatMessage::system("be brief"),
        ChatMessage::user("weather?"),
        ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call-1".to_string(),
            name: "weather".to_string(),
            arguments: json!({"city": "Oslo"}),
        }]),
        ChatMessage::tool("call-1", "sunny"),
        ChatMessage::function("weather", "sunny"),
        ChatMessage::assistant("It is sunny."),
    ];

    let value = messages_to_value(&messages);
    assert_eq!(
        value,
        json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "weather?"},
            {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call-1",
                    "type": "function",
                    "function": {"name": "weather", "arguments": {"city": "Oslo"}}
                }]
            },
            {"role": "tool", "tool_call_id": "call-1", "content": "sunny"},
            {"role": "function", "name": "weather", "content": "sunny"},
            {"role": "assistant", "content": "It is sunny."}
        ])
    );
}
