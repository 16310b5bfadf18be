//! Subcommand execution against an established `ClientHandle`.
//!
//! Records are printed as relaxed extended JSON, one document per entry.

use crate::cli::Command;
use anyhow::{bail, Context, Result};
use bson::{doc, Bson, Document};
use dbcomm_core::{ClientHandle, RecordSelector, SessionState, TaggedDocument};
use std::io::Write;

/// Run one subcommand, writing its output to `out`.
pub fn execute(handle: &ClientHandle, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Databases => {
            let state = handle.open_session()?;
            for name in &state.databases {
                writeln!(out, "{name}")?;
            }
        }
        Command::Collections { database } => {
            let state = session_in(handle, &database)?;
            for name in &state.collections {
                writeln!(out, "{name}")?;
            }
        }
        Command::Get { database, collection, id } => {
            let state = session_in(handle, &database)?;
            let selector = RecordSelector::id(id.as_str())?;
            match handle.get_record(&state, &collection, selector)? {
                Some(record) => print_document(out, record)?,
                None => bail!("No record with _id {id} in {database}.{collection}"),
            }
        }
        Command::FindId { database, id } => {
            let state = session_in(handle, &database)?;
            match handle.find_by_id_across_collections(&state, id.as_str())? {
                Some(found) => print_tagged(out, found)?,
                None => bail!("No record with _id {id} in {database}"),
            }
        }
        Command::Find { database, filter } => {
            let state = session_in(handle, &database)?;
            let filter = parse_json(&filter)?;
            for found in handle.find_by_field_across_collections(&state, &filter)? {
                print_tagged(out, found)?;
            }
        }
        Command::List { database, collection } => {
            let state = session_in(handle, &database)?;
            for record in handle.list_records(&state, &collection)? {
                print_document(out, record)?;
            }
        }
        Command::Insert { database, collection, record } => {
            let state = session_in(handle, &database)?;
            let id = handle.insert_record(&state, &collection, parse_document(&record)?)?;
            writeln!(out, "{}", id.into_relaxed_extjson())?;
        }
        Command::Update { database, collection, id, values, kind } => {
            let state = session_in(handle, &database)?;
            let selector = RecordSelector::id(id.as_str())?;
            let outcome =
                handle.update_record(&state, &collection, selector, parse_document(&values)?, kind)?;
            writeln!(out, "matched {}, modified {}", outcome.matched, outcome.modified)?;
        }
        Command::Delete { database, collection, id } => {
            let state = session_in(handle, &database)?;
            let selector = id.as_deref().map(RecordSelector::id).transpose()?;
            let deleted = handle.delete_records(&state, &collection, selector)?;
            writeln!(out, "deleted {deleted}")?;
        }
        Command::Drop { database, collection } => {
            let mut state = session_in(handle, &database)?;
            handle.drop_collection(&mut state, &collection)?;
            writeln!(out, "dropped {database}.{collection}")?;
        }
        Command::PutFile { database, path } => {
            let state = session_in(handle, &database)?;
            let id = handle.put_file_from_path(&state, &path, None)?;
            writeln!(out, "{}", id.to_hex())?;
        }
        Command::GetFile { database, id, output } => {
            let state = session_in(handle, &database)?;
            let data = handle.get_file(&state, id.as_str())?;
            std::fs::write(&output, &data)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            writeln!(out, "wrote {} bytes to {}", data.len(), output.display())?;
        }
        Command::DeleteFile { database, id } => {
            let state = session_in(handle, &database)?;
            handle.delete_file(&state, id.as_str())?;
            writeln!(out, "deleted file {id}")?;
        }
    }
    Ok(())
}

fn session_in(handle: &ClientHandle, database: &str) -> Result<SessionState> {
    let mut state = handle.open_session()?;
    handle.select_database(&mut state, database)?;
    Ok(state)
}

/// Parse JSON text, honouring extended JSON such as `{"$oid": "..."}`.
fn parse_json(text: &str) -> Result<Bson> {
    let value: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("Invalid JSON: {text}"))?;
    Ok(Bson::try_from(value)?)
}

fn parse_document(text: &str) -> Result<Document> {
    match parse_json(text)? {
        Bson::Document(document) => Ok(document),
        other => bail!("Expected a JSON object, got {:?}", other.element_type()),
    }
}

fn print_document(out: &mut dyn Write, document: Document) -> Result<()> {
    let json = Bson::Document(document).into_relaxed_extjson();
    writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
    Ok(())
}

fn print_tagged(out: &mut dyn Write, found: TaggedDocument) -> Result<()> {
    print_document(out, doc! { "collection": found.collection, "record": found.document })
}
