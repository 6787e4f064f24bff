// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Command line front end for the quote client
//!
//! ```text
//! tpm2-quote random --bytes 32
//! tpm2-quote --tcti mssim quote --handle 0x810100AA --pcrs sha256:0,1,2,3 --extra-data Ian12345
//! ```

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use tpm2_quote::{quote_to_interchange, QuoteRequest, Tcti, TpmContext, TpmSu, TpmlPcrSelection};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// TPM transport, e.g. `device:/dev/tpmrm0` or `mssim:host=localhost,port=2321`
    #[arg(long, global = true, env = "TPM2TOOLS_TCTI")]
    tcti: Option<Tcti>,

    /// Send TPM2_Startup(CLEAR) first, as a freshly powered simulator needs
    #[arg(long, global = true)]
    startup: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get random bytes from the TPM
    Random(RandomArgs),
    /// Quote PCRs with an attestation key
    Quote(QuoteArgs),
}

#[derive(Args)]
struct RandomArgs {
    /// number of bytes to request
    #[arg(short = 'n', long, default_value_t = 32)]
    bytes: usize,
}

#[derive(Args)]
struct QuoteArgs {
    /// persistent handle of the signing key
    #[arg(long, value_parser = parse_handle, default_value = "0x810100AA")]
    handle: u32,

    /// PCR selection, e.g. `sha256:0,1,2,3` or `sha256:0,1+sha1:7`
    #[arg(long, default_value = "sha256:0,1,2,3")]
    pcrs: TpmlPcrSelection,

    /// qualifying data passed to the TPM verbatim
    #[arg(long, conflicts_with = "random_nonce")]
    extra_data: Option<String>,

    /// use N bytes from TPM2_GetRandom as qualifying data
    #[arg(long, value_name = "N")]
    random_nonce: Option<usize>,

    /// read the key's public area and verify the quote signature with it
    #[arg(long)]
    verify: bool,

    /// print the hex evidence bundle instead of the decoded quote
    #[arg(long)]
    evidence: bool,
}

fn parse_handle(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid handle {s:?}: {e}"))
}

fn cmd_random(ctx: &mut TpmContext<Box<dyn tpm2_quote::Transport>>, args: RandomArgs) -> Result<()> {
    let bytes = ctx.get_random(args.bytes).context("failed to get random bytes")?;
    writeln!(io::stdout(), "{}", hex::encode(bytes)).context("failed to write output")?;
    Ok(())
}

fn cmd_quote(ctx: &mut TpmContext<Box<dyn tpm2_quote::Transport>>, args: QuoteArgs) -> Result<()> {
    let qualifying_data = match (args.extra_data, args.random_nonce) {
        (_, Some(n)) => ctx.get_random(n).context("failed to get nonce")?,
        (Some(text), None) => text.into_bytes(),
        (None, None) => Vec::new(),
    };
    info!(
        "quoting {} with key 0x{:08x}, extra data {}",
        args.pcrs,
        args.handle,
        hex::encode(&qualifying_data)
    );

    let request = QuoteRequest::new(args.handle, args.pcrs, qualifying_data);
    let quote = if args.verify {
        ctx.quote_with_signer(request)
    } else {
        ctx.quote(request)
    }
    .context("quote failed")?;

    let output = if args.evidence {
        serde_json::to_string_pretty(&quote.evidence())?
    } else {
        serde_json::to_string_pretty(&Value::Object(quote_to_interchange(
            &quote.attest,
            &quote.signature,
        )))?
    };
    writeln!(io::stdout(), "{output}").context("failed to write output")?;
    if quote.signature_verified {
        info!("quote signature verified");
    }
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(io::stderr).init();
    }

    let cli = Cli::parse();

    let mut ctx = TpmContext::open(cli.tcti.as_ref()).context("failed to open TPM")?;
    if cli.startup {
        ctx.startup(TpmSu::Clear).context("TPM2_Startup failed")?;
    }

    match cli.command {
        Commands::Random(args) => cmd_random(&mut ctx, args)?,
        Commands::Quote(args) => cmd_quote(&mut ctx, args)?,
    }
    Ok(())
}
