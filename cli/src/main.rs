#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// Fleeting CLI Client
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io::{Read, Write};
use std::num::NonZeroU32;
use std::num::NonZeroU64;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use atty::Stream;
use clap::{Parser, Subcommand};
use fleeting_common::{
    CreatePaste, CreatedPaste, ErrorBody, PasteUrl, PasteView, Url, API_ENDPOINT,
};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;

#[derive(Parser)]
#[command(version, about = "Create and read self-destructing pastes")]
struct Opts {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Creates a paste and prints its share link.
    Create {
        /// The Fleeting instance to create the paste on.
        #[arg(short, long, env = "FLEETING_SERVER")]
        server: Url,
        /// Seconds until the paste expires. Defaults to never.
        #[arg(short, long)]
        ttl: Option<NonZeroU64>,
        /// Number of reads before the paste is gone. Defaults to unlimited.
        #[arg(short, long)]
        max_views: Option<NonZeroU32>,
        /// File to upload. Reads stdin if omitted.
        path: Option<PathBuf>,
    },
    /// Reads a paste, spending one of its views.
    Get {
        /// The paste's share link or API link.
        url: PasteUrl,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.action {
        Action::Create {
            server,
            ttl,
            max_views,
            path,
        } => handle_create(server, ttl, max_views, path),
        Action::Get { url } => handle_get(&url),
    }?;

    Ok(())
}

fn handle_create(
    mut server: Url,
    ttl: Option<NonZeroU64>,
    max_views: Option<NonZeroU32>,
    path: Option<PathBuf>,
) -> Result<()> {
    let content = if let Some(path) = path {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        if atty::is(Stream::Stdin) {
            bail!("No file given and stdin is a terminal. Pipe the paste in or pass a path.");
        }
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        content
    };

    if content.trim().is_empty() {
        bail!("Refusing to create an empty paste.");
    }

    let mut request = CreatePaste::new(content);
    if let Some(ttl) = ttl {
        request = request.ttl_seconds(ttl.get());
    }
    if let Some(max_views) = max_views {
        request = request.max_views(max_views.get());
    }

    server.set_fragment(None);
    server.set_query(None);
    server.set_path(&format!("{API_ENDPOINT}/pastes"));

    let res = Client::new()
        .post(server)
        .json(&request)
        .send()
        .context("Request to server failed")?;

    if res.status() != StatusCode::CREATED {
        bail!("Create failed. {}", describe_error(res));
    }

    let created: CreatedPaste = res.json().context("Server sent a malformed response")?;
    println!("{}", created.url);

    Ok(())
}

fn handle_get(url: &PasteUrl) -> Result<()> {
    let res = Client::new()
        .get(url.api_url.clone())
        .send()
        .context("Failed to get data")?;

    match res.status() {
        StatusCode::OK => (),
        StatusCode::NOT_FOUND => {
            return Err(anyhow!("Paste {} does not exist or has expired.", url.id));
        }
        _ => bail!("Got bad response from server. {}", describe_error(res)),
    }

    let view: PasteView = res.json().context("Server sent a malformed response")?;
    std::io::stdout().write_all(view.content.as_bytes())?;
    if atty::is(Stream::Stdout) && !view.content.ends_with('\n') {
        println!();
    }

    eprintln!("{view}");

    Ok(())
}

/// Formats an error response, preferring the server's own message.
fn describe_error(res: Response) -> String {
    let status = res.status();
    match res.json::<ErrorBody>() {
        Ok(body) => format!("Got HTTP error {status}: {}", body.error),
        Err(_) => format!("Got HTTP error {status}"),
    }
}
