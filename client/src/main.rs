mod cli;

use std::{env, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::{
    CreateAutoPilotMonitorRequest, CreateAutoPilotMonitorResponse, ErrorResponse, JobResponse,
    OWNER_HEADER,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::cli::{Cli, Commands};

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url(flag: Option<String>) -> String {
    flag.or_else(|| env::var("MASTER_URL").ok())
        .unwrap_or_else(|| "http://localhost:8080".to_string())
        .trim_end_matches('/')
        .to_string()
}

fn owner_id(flag: Option<String>) -> Result<String> {
    flag.or_else(|| env::var("OWNER_ID").ok())
        .filter(|o| !o.trim().is_empty())
        .context("falta el dueño: usá --owner o OWNER_ID")
}

struct MasterClient {
    http: Client,
    base_url: String,
    owner: String,
}

impl MasterClient {
    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header(OWNER_HEADER, &self.owner)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header(OWNER_HEADER, &self.owner)
    }

    async fn list(&self) -> Result<Vec<JobResponse>> {
        read_json(self.get("/api/v1/jobs").send().await?).await
    }

    async fn active(&self) -> Result<Vec<JobResponse>> {
        read_json(self.get("/api/v1/jobs/active").send().await?).await
    }

    async fn status(&self, id: &str) -> Result<JobResponse> {
        read_json(self.get(&format!("/api/v1/jobs/{id}")).send().await?).await
    }

    async fn cancel(&self, id: &str) -> Result<JobResponse> {
        read_json(self.post(&format!("/api/v1/jobs/{id}/cancel")).send().await?).await
    }

    async fn monitor(
        &self,
        project_id: String,
        token: Option<String>,
    ) -> Result<CreateAutoPilotMonitorResponse> {
        let mut req = self
            .post("/api/v1/jobs/autopilot-monitor")
            .json(&CreateAutoPilotMonitorRequest { project_id });
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        read_json(req.send().await?).await
    }

    /// Consulta el job hasta que llegue a un estado terminal.
    async fn watch(&self, id: &str, interval: Duration) -> Result<JobResponse> {
        let mut last_line = String::new();
        loop {
            let job = self.status(id).await?;
            let line = watch_line(&job);
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Los errores del master vienen como `{"detail": "..."}`.
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.detail)
        .unwrap_or(body);
    bail!("el master respondió {}: {}", status, detail)
}

fn progress_bar(progress: f64, width: usize) -> String {
    let filled = (common::clamp_progress(progress) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn watch_line(job: &JobResponse) -> String {
    format!(
        "{} {:>3.0}% {} {}",
        progress_bar(job.progress, 20),
        job.progress * 100.0,
        job.status,
        job.message
    )
}

fn print_job(job: &JobResponse) {
    println!("Job:");
    println!("  id: {}", job.job_id);
    println!("  tipo: {}", job.job_type);
    println!("  estado: {}", job.status);
    println!("  progreso: {:.0}%", job.progress * 100.0);
    if !job.message.is_empty() {
        println!("  mensaje: {}", job.message);
    }
    if let Some(err) = &job.error {
        println!("  error: {err}");
    }
    println!("  creado: {}", job.created_at);
    println!("  actualizado: {}", job.updated_at);
}

fn print_table(jobs: &[JobResponse]) {
    if jobs.is_empty() {
        println!("(sin jobs)");
        return;
    }
    println!("{:<36}  {:<18}  {:<9}  {:>5}", "ID", "TIPO", "ESTADO", "%");
    for job in jobs {
        println!(
            "{:<36}  {:<18}  {:<9}  {:>4.0}%",
            job.job_id,
            job.job_type,
            job.status,
            job.progress * 100.0
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = MasterClient {
        http: Client::new(),
        base_url: master_base_url(cli.master_url),
        owner: owner_id(cli.owner)?,
    };

    match cli.command {
        Commands::List => print_table(&client.list().await?),
        Commands::Active => print_table(&client.active().await?),
        Commands::Status { id } => print_job(&client.status(&id).await?),
        Commands::Cancel { id } => {
            let job = client.cancel(&id).await?;
            println!("Cancelación pedida para el job {}", job.job_id);
        }
        Commands::Monitor {
            project_id,
            token,
            watch,
        } => {
            let created = client.monitor(project_id, token).await?;
            println!("{}", created.message);
            println!("  job id: {}", created.job_id);
            if watch {
                let job = client
                    .watch(&created.job_id, Duration::from_secs(2))
                    .await?;
                print_job(&job);
            }
        }
        Commands::Watch { id, interval } => {
            let job = client
                .watch(&id, Duration::from_secs(interval.max(1)))
                .await?;
            print_job(&job);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barra_de_progreso() {
        assert_eq!(progress_bar(0.0, 4), "[----]");
        assert_eq!(progress_bar(0.5, 4), "[##--]");
        assert_eq!(progress_bar(1.0, 4), "[####]");
        // fuera de rango se recorta
        assert_eq!(progress_bar(3.0, 4), "[####]");
        assert_eq!(progress_bar(f64::NAN, 4), "[----]");
    }

    #[test]
    fn flag_de_url_gana_y_sin_barra_final() {
        assert_eq!(
            master_base_url(Some("http://master:8080/".to_string())),
            "http://master:8080"
        );
    }

    #[test]
    fn flag_de_dueno_se_usa_tal_cual() {
        assert_eq!(owner_id(Some("u1".to_string())).unwrap(), "u1");
    }
}
