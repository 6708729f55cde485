use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
pub struct Cli {
    /// Dueño de los jobs (si no, OWNER_ID)
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// URL del master (si no, MASTER_URL o http://localhost:8080)
    #[arg(long, global = true)]
    pub master_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lista mis jobs, más nuevos primero
    List,
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista mis jobs pendientes o corriendo
    Active,
    /// Pide cancelar un job
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Crea un job de monitoreo de AutoPilot para un proyecto
    Monitor {
        #[arg(value_name = "PROJECT_ID")]
        project_id: String,

        /// Token de AutoML propio, en vez del configurado en el master
        #[arg(long)]
        token: Option<String>,

        /// Después de crearlo, seguirlo hasta que termine
        #[arg(long)]
        watch: bool,
    },
    /// Sigue un job hasta que termine, mostrando el progreso
    Watch {
        #[arg(value_name = "JOB_ID")]
        id: String,

        /// Segundos entre consultas
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
}
