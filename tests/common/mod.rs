#![allow(dead_code)]

use candle_core::{DType, Device, Tensor};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use wordweaver::app::{create_router, AppState, Server};
use wordweaver::envconfig::{AllowedOrigins, DTypePreference, DevicePreference};
use wordweaver::infra::{self, ModelFiles};
use wordweaver::introspect::Introspector;

pub const HIDDEN: usize = 16;
pub const LAYERS: usize = 2;
pub const WORDS: &[&str] = &["hello", "Ġworld", "Ġthe", "Ġcat"];
pub const VOCAB: usize = 256 + 4 + 1;

/// GPT-2 byte-to-unicode table.
fn byte_chars() -> Vec<char> {
    let printable: Vec<u8> = (b'!'..=b'~').chain(0xA1..=0xAC).chain(0xAE..=0xFF).collect();
    let mut next = 256u32;
    (0..=255u8)
        .map(|b| {
            if printable.contains(&b) {
                char::from(b)
            } else {
                let c = char::from_u32(next).unwrap();
                next += 1;
                c
            }
        })
        .collect()
}

fn write_tokenizer(dir: &Path) {
    let mut vocab = serde_json::Map::new();
    for (id, c) in byte_chars().into_iter().enumerate() {
        vocab.insert(c.to_string(), json!(id));
    }
    for (i, word) in WORDS.iter().enumerate() {
        vocab.insert(word.to_string(), json!(256 + i));
    }
    let tokenizer = json!({
        "version": "1.0",
        "added_tokens": [
            {"id": VOCAB - 1, "content": "<|endoftext|>", "special": true}
        ],
        "model": {
            "type": "BPE",
            "vocab": vocab,
            "merges": [],
            "ignore_merges": true
        }
    });
    std::fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();
}

fn write_config(dir: &Path) {
    let config = json!({
        "architectures": ["LlamaForCausalLM"],
        "model_type": "llama",
        "hidden_size": HIDDEN,
        "intermediate_size": 32,
        "num_hidden_layers": LAYERS,
        "num_attention_heads": 4,
        "num_key_value_heads": 2,
        "vocab_size": VOCAB,
        "max_position_embeddings": 128,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "tie_word_embeddings": true
    });
    std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
}

fn filled(shape: &[usize], salt: usize) -> Tensor {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n)
        .map(|i| ((((i + 1) * 7919 + salt * 104_729) % 1000) as f32 / 1000.0 - 0.5) * 0.4)
        .collect();
    Tensor::from_vec(data, shape, &Device::Cpu).unwrap()
}

fn write_weights(dir: &Path) {
    let head_dim = HIDDEN / 4;
    let kv = 2 * head_dim;
    let mut shapes: Vec<(String, Vec<usize>)> = vec![
        ("model.embed_tokens.weight".into(), vec![VOCAB, HIDDEN]),
        ("model.norm.weight".into(), vec![HIDDEN]),
    ];
    for l in 0..LAYERS {
        let p = format!("model.layers.{l}");
        shapes.extend([
            (format!("{p}.self_attn.q_proj.weight"), vec![HIDDEN, HIDDEN]),
            (format!("{p}.self_attn.k_proj.weight"), vec![kv, HIDDEN]),
            (format!("{p}.self_attn.v_proj.weight"), vec![kv, HIDDEN]),
            (format!("{p}.self_attn.o_proj.weight"), vec![HIDDEN, HIDDEN]),
            (format!("{p}.mlp.gate_proj.weight"), vec![32, HIDDEN]),
            (format!("{p}.mlp.up_proj.weight"), vec![32, HIDDEN]),
            (format!("{p}.mlp.down_proj.weight"), vec![HIDDEN, 32]),
            (format!("{p}.input_layernorm.weight"), vec![HIDDEN]),
            (format!("{p}.post_attention_layernorm.weight"), vec![HIDDEN]),
        ]);
    }

    let tensors: HashMap<String, Tensor> = shapes
        .into_iter()
        .enumerate()
        .map(|(salt, (name, shape))| {
            let t = if name.ends_with("norm.weight") {
                Tensor::ones(shape.as_slice(), DType::F32, &Device::Cpu).unwrap()
            } else {
                filled(&shape, salt)
            };
            (name, t)
        })
        .collect();
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();
}

/// A complete tiny checkpoint: config, byte-level tokenizer, safetensors.
pub fn tiny_model_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path());
    write_tokenizer(dir.path());
    write_weights(dir.path());
    dir
}

pub fn load_introspector(dir: &Path) -> Introspector {
    let files = ModelFiles::resolve(dir).unwrap();
    let (model, tokenizer) = infra::load(&files, DevicePreference::Cpu, DTypePreference::F32).unwrap();
    Introspector::new(Arc::new(model), Arc::new(tokenizer))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_origins(AllowedOrigins::Any).await
    }

    pub async fn start_with_origins(origins: AllowedOrigins) -> Self {
        let dir = tiny_model_dir();
        let introspector = load_introspector(dir.path());
        let router = create_router(AppState::new(introspector), origins);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            Server::new()
                .routes(router)
                .serve(listener, async move {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> serde_json::Value {
        let response = self.post(path, body).await;
        assert!(response.status().is_success(), "{} -> {}", path, response.status());
        response.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
