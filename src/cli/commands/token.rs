use anyhow::Context;
use clap::Subcommand;
use serde_json::json;

use crate::auth::{generate_jwt, Claims, IdentityVerifier};
use crate::cli::OutputFormat;
use crate::config;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a token with the configured JWT_SECRET")]
    Mint {
        #[arg(long, help = "Subject (user id)")]
        sub: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, help = "admin, guardian or ward")]
        role: Option<String>,
        #[arg(long, help = "tenantId claim")]
        tenant: Option<String>,
        #[arg(long, help = "organizationId claim")]
        org: Option<String>,
        #[arg(long, help = "Lifetime in hours (defaults to SECURITY_JWT_EXPIRY_HOURS)")]
        hours: Option<u64>,
    },

    #[command(about = "Verify a token and print the identity it carries")]
    Inspect {
        #[arg(help = "Bearer token")]
        token: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let security = &config::config().security;

    match cmd {
        TokenCommands::Mint { sub, email, role, tenant, org, hours } => {
            let mut claims = Claims::new(sub, hours.unwrap_or(security.jwt_expiry_hours))?;
            claims.email = email;
            claims.role = role;
            claims.tenant_id = tenant;
            claims.organization_id = org;

            let token = generate_jwt(&claims, &security.jwt_secret).context("failed to sign token")?;
            match output_format {
                OutputFormat::Json => println!("{}", json!({ "token": token, "exp": claims.exp })),
                OutputFormat::Text => println!("{}", token),
            }
            Ok(())
        }
        TokenCommands::Inspect { token } => {
            let verifier = IdentityVerifier::from_secret(&security.jwt_secret)?;
            let identity = verifier.verify(&token)?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&identity)?),
                OutputFormat::Text => {
                    println!("subject:      {}", identity.subject_id());
                    println!("email:        {}", identity.email().unwrap_or("-"));
                    println!("role:         {}", identity.role().map(|r| r.as_str()).unwrap_or("-"));
                    println!("tenant:       {}", identity.tenant_id().unwrap_or("-"));
                    println!("organization: {}", identity.organization_id().unwrap_or("-"));
                }
            }
            Ok(())
        }
    }
}
