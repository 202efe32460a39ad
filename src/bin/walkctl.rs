//! walkctl - command line client for the walk coordinator API
//!
//! Usage:
//!   walkctl --token secret start --lat 38.9 --lng -77.0
//!   walkctl --token secret available --lat 38.9 --lng -77.0 --radius-km 1
//!   walkctl --token secret claim "1 Elm St" "2 Elm St"
//!   walkctl --token secret complete <claim-id> --contacted 2 --home 1
//!
//! The token and base URL can also come from WALK_TOKEN and WALK_URL.

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use std::env;

#[derive(Parser, Debug)]
#[command(name = "walkctl")]
#[command(about = "Walk coordinator command line client")]
struct Args {
    /// Base URL of the coordinator (default: $WALK_URL or http://127.0.0.1:8080)
    #[arg(long)]
    url: Option<String>,

    /// Bearer token (default: $WALK_TOKEN)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start a walk session
    Start {
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,
    },
    Pause,
    Resume,
    /// Complete the open session
    End {
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,
    },
    Abandon,
    /// Show the open session and its active claims
    Current,
    /// List activities of the open session
    Activities,
    /// Report the current position
    Location {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
    /// Unclaimed houses near a point
    Available {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        radius_km: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Claim directory addresses
    Claim {
        #[arg(required = true)]
        addresses: Vec<String>,
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
    Arrive {
        claim_id: String,
    },
    Complete {
        claim_id: String,
        #[arg(long, default_value_t = 0)]
        contacted: u32,
        #[arg(long, default_value_t = 0)]
        home: u32,
        #[arg(long)]
        notes: Option<String>,
    },
    Release {
        claim_id: String,
    },
    /// Order addresses into a walking route
    Route {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Canvassers near a point
    Canvassers {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    Health,
    Metrics,
}

struct Api {
    client: Client,
    base: String,
    token: Option<String>,
}

impl Api {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> anyhow::Result<String> {
        let resp = builder.send().await.context("request failed")?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("{status}: {text}");
        }
        Ok(text)
    }

    async fn post(&self, path: &str, body: Value) -> anyhow::Result<String> {
        self.send(self.request(Method::POST, path).json(&body)).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<String> {
        self.send(self.request(Method::GET, path).query(query)).await
    }
}

fn point_body(lat: Option<f64>, lng: Option<f64>) -> Value {
    match (lat, lng) {
        (Some(lat), Some(lng)) => json!({ "latitude": lat, "longitude": lng }),
        _ => json!({}),
    }
}

fn radius_query(lat: f64, lng: f64, radius_km: Option<f64>) -> Vec<(&'static str, String)> {
    let mut query = vec![("latitude", lat.to_string()), ("longitude", lng.to_string())];
    if let Some(r) = radius_km {
        query.push(("radiusKm", r.to_string()));
    }
    query
}

fn print_body(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string())),
        Err(_) => println!("{text}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let base = args
        .url
        .or_else(|| env::var("WALK_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
    let api = Api {
        client: Client::new(),
        base: base.trim_end_matches('/').to_string(),
        token: args.token.or_else(|| env::var("WALK_TOKEN").ok()),
    };

    let text = match args.command {
        Cmd::Start { lat, lng } => api.post("/api/walk/sessions/start", point_body(lat, lng)).await?,
        Cmd::Pause => api.post("/api/walk/sessions/pause", json!({})).await?,
        Cmd::Resume => api.post("/api/walk/sessions/resume", json!({})).await?,
        Cmd::End { lat, lng } => api.post("/api/walk/sessions/end", point_body(lat, lng)).await?,
        Cmd::Abandon => api.post("/api/walk/sessions/abandon", json!({})).await?,
        Cmd::Current => api.get("/api/walk/sessions/current", &[]).await?,
        Cmd::Activities => api.get("/api/walk/sessions/current/activities", &[]).await?,
        Cmd::Location { lat, lng } => {
            api.post("/api/walk/location", json!({ "latitude": lat, "longitude": lng })).await?
        }
        Cmd::Available { lat, lng, radius_km, limit } => {
            let mut query = radius_query(lat, lng, radius_km);
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            api.get("/api/walk/houses/available", &query).await?
        }
        Cmd::Claim { addresses, ttl_minutes } => {
            api.post("/api/walk/houses/claim", json!({ "addresses": addresses, "ttlMinutes": ttl_minutes })).await?
        }
        Cmd::Arrive { claim_id } => api.post(&format!("/api/walk/houses/{claim_id}/arrive"), json!({})).await?,
        Cmd::Complete { claim_id, contacted, home, notes } => {
            api.post(
                &format!("/api/walk/houses/{claim_id}/complete"),
                json!({ "votersContacted": contacted, "votersHome": home, "notes": notes }),
            )
            .await?
        }
        Cmd::Release { claim_id } => api.post(&format!("/api/walk/houses/{claim_id}/release"), json!({})).await?,
        Cmd::Route { lat, lng, addresses } => {
            api.post(
                "/api/walk/routes/optimize",
                json!({ "startLatitude": lat, "startLongitude": lng, "addresses": addresses }),
            )
            .await?
        }
        Cmd::Canvassers { lat, lng, radius_km } => {
            api.get("/api/walk/canvassers/active", &radius_query(lat, lng, radius_km)).await?
        }
        Cmd::Health => api.get("/health", &[]).await?,
        Cmd::Metrics => api.get("/metrics", &[]).await?,
    };

    print_body(&text);
    Ok(())
}
