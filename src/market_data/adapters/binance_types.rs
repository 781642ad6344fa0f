// Source: https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams
// Combined stream frame: {"stream":"btcusdt@depth","data":{...depthUpdate...}}
#[derive(Debug, serde::Deserialize)]
pub struct WsEnvelope {
    pub stream: String,
    pub data: serde_json::Value,
}

// Reply to a SUBSCRIBE / LIST_SUBSCRIPTIONS request, e.g. {"result":null,"id":1}
#[derive(Debug, serde::Deserialize)]
pub struct WsCommandReply {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

// Error body returned by the REST API, e.g. {"code":-1121,"msg":"Invalid symbol."}
#[derive(Debug, serde::Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}
