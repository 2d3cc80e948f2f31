//! Execution of CLI commands against an open cache.

use crate::Command;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::process::ExitCode;
use tagstash::{CacheStore, Lifetime, Lookup};

fn print_json<W: Write>(out: &mut W, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run one command. `input` supplies the payload for a `save` without VALUE.
pub fn run<R: Read, W: Write>(
    cache: &CacheStore,
    command: &Command,
    mut input: R,
    out: &mut W,
) -> Result<ExitCode> {
    match command {
        Command::Save {
            id,
            tags,
            ttl,
            infinite,
            value,
        } => {
            let payload = match value {
                Some(value) => value.clone().into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    input
                        .read_to_end(&mut buf)
                        .context("Failed to read payload from stdin")?;
                    buf
                }
            };
            let lifetime = match (ttl, infinite) {
                (_, true) => Lifetime::Infinite,
                (Some(secs), false) => Lifetime::Seconds(*secs),
                (None, false) => Lifetime::Default,
            };
            cache.save(&payload, id, tags, lifetime)?;
        }
        Command::Load { id } => match cache.load(id)? {
            Lookup::Found(payload) => {
                out.write_all(&payload)?;
                out.flush()?;
            }
            Lookup::NotFound => return Ok(ExitCode::FAILURE),
        },
        Command::Test { id } => return Ok(status(cache.test(id)?)),
        Command::Remove { id } => return Ok(status(cache.remove(id)?)),
        Command::Clean { mode, tags } => {
            let removed = cache.clean(*mode, tags)?;
            print_json(out, &serde_json::json!({ "mode": mode, "removed": removed }))?;
        }
        Command::Ids => print_json(out, &cache.get_ids()?)?,
        Command::Tags => print_json(out, &cache.get_tags()?)?,
        Command::Matching { tags } => print_json(out, &cache.get_ids_matching_tags(tags)?)?,
        Command::NotMatching { tags } => {
            print_json(out, &cache.get_ids_not_matching_tags(tags)?)?
        }
        Command::Any { tags } => print_json(out, &cache.get_ids_matching_any_tags(tags)?)?,
        Command::Touch { id, secs } => return Ok(status(cache.touch(id, *secs)?)),
        Command::Compact => print_json(out, &cache.compact()?)?,
        Command::Capabilities => print_json(out, &cache.capabilities())?,
    }
    Ok(ExitCode::SUCCESS)
}
