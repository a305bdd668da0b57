//! Human-readable dumps of the stores, one section per store.
//!
//! Each section is a delimiter line, the store's directory and then one block
//! of lines per record in key order.  A record's lines go out through
//! `write_record`, so an abort never leaves half a record behind.

use std::{collections::BTreeMap, collections::BTreeSet, sync::Arc};

use tracing::warn;

use super::interface::{global_store, project_store, JobCommand, JobContext, Result};
use crate::{
    index_db::{
        location::decode_file_id,
        records::{
            time_to_string, CursorInfo, FileInformation, MakefileMap, PchMap, GENERAL_MAKEFILES_KEY,
            GENERAL_PCH_KEY, GENERAL_VERSION_KEY,
        },
        Location, Store, StoreKind, StoreRead,
    },
    server::Project,
};

pub const DELIMITER: &str = "*********************************";
pub const ALTERNATIVES: &str =
    "general|fileids|dependencies|fileinfos|symbols|symbolnames|pch|visitedfiles";

#[derive(Debug)]
pub struct StatusCommand {
    /// Section name, matched case-insensitively.  Empty dumps everything.
    pub section: String,
}

impl StatusCommand {
    pub fn new(section: &str) -> Self {
        StatusCommand {
            section: section.to_ascii_lowercase(),
        }
    }

    fn wants(&self, section: &str) -> bool {
        self.section.is_empty() || self.section == section
    }
}

impl JobCommand for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }

    fn execute(&self, ctx: &mut JobContext) -> Result<()> {
        let registry = ctx.registry().clone();
        let mut matched = false;

        if self.wants("general") {
            matched = true;
            dump_general(ctx, global_store(&registry, StoreKind::General)?)?;
        }
        if self.wants("fileids") {
            matched = true;
            dump_file_ids(ctx, global_store(&registry, StoreKind::FileIds)?)?;
        }
        if self.wants("pch") {
            matched = true;
            dump_pch(ctx, global_store(&registry, StoreKind::General)?)?;
        }

        let project = match ctx.project().cloned() {
            Some(project) => project,
            None => {
                if !matched {
                    ctx.write(ALTERNATIVES);
                }
                return Ok(());
            }
        };

        if self.wants("dependencies") {
            matched = true;
            dump_dependencies(ctx, project_store(&project, StoreKind::Dependencies)?)?;
        }
        if self.wants("symbols") {
            matched = true;
            dump_symbols(ctx, project_store(&project, StoreKind::Symbols)?)?;
        }
        if self.wants("symbolnames") {
            matched = true;
            dump_symbol_names(ctx, project_store(&project, StoreKind::SymbolNames)?)?;
        }
        if self.wants("fileinfos") {
            matched = true;
            dump_file_infos(ctx, project_store(&project, StoreKind::FileInformation)?)?;
        }
        // An empty query always writes this header, indexer or not; asking
        // for the section by name only works when an indexer is attached.
        if self.section.is_empty() || (self.section == "visitedfiles" && project.has_indexer()) {
            matched = true;
            dump_visited_files(ctx, &project)?;
        }

        if !matched {
            ctx.write(ALTERNATIVES);
        }
        Ok(())
    }
}

fn write_header(ctx: &mut JobContext, store: &Store) {
    ctx.write(DELIMITER);
    ctx.write(store.dir().display().to_string());
}

fn dump_general(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let guard = ctx.read_store(store)?;
    write_header(ctx, store);

    let version = guard.get::<u32>(GENERAL_VERSION_KEY).unwrap_or_else(|err| {
        warn!(%err, "corrupt version record");
        None
    });
    ctx.write_record(vec![format!("    version: {}", version.unwrap_or_default())]);

    let makefiles = match guard.get::<MakefileMap>(GENERAL_MAKEFILES_KEY) {
        Ok(makefiles) => makefiles.unwrap_or_default(),
        Err(err) => {
            warn!(%err, "skipping corrupt makefiles record");
            MakefileMap::new()
        }
    };
    for (path, info) in makefiles {
        ctx.check_abort()?;
        let mut line = format!("    {} last touched: {}", path, time_to_string(info.last_touched));
        if !info.makefile_args.is_empty() {
            line.push_str(&format!(" args: {}", info.makefile_args.join(" ")));
        }
        if !info.extra_flags.is_empty() {
            line.push_str(&format!(" extra flags: {}", info.extra_flags.join(" ")));
        }
        ctx.write_record(vec![line]);
    }
    Ok(())
}

fn dump_file_ids(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let guard = ctx.read_store(store)?;
    write_header(ctx, store);

    let mut it = guard.create_iterator();
    it.seek_to_first();
    while it.is_valid() {
        ctx.check_abort()?;
        match it.value::<u32>() {
            Ok(id) => ctx.write_record(vec![format!("  {}: {}", id, String::from_utf8_lossy(it.key()))]),
            Err(err) => warn!(%err, "skipping corrupt file id record"),
        }
        it.next();
    }
    Ok(())
}

fn dump_pch(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let guard = ctx.read_store(store)?;
    write_header(ctx, store);

    let pchs = match guard.get::<PchMap>(GENERAL_PCH_KEY) {
        Ok(pchs) => pchs.unwrap_or_default(),
        Err(err) => {
            warn!(%err, "skipping corrupt pch record");
            PchMap::new()
        }
    };
    for (path, info) in pchs {
        ctx.check_abort()?;
        let mut line = format!("    {} last touched: {}", path, time_to_string(info.last_touched));
        if !info.args.is_empty() {
            line.push_str(&format!(" args: {}", info.args.join(" ")));
        }
        ctx.write_record(vec![line]);
    }
    Ok(())
}

fn dependency_block(ctx: &JobContext, file_id: u32, label: &str, others: &BTreeSet<u32>) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(others.len() + 1);
    lines.push(format!("  {} ({}) {}", ctx.path(file_id)?, file_id, label));
    for other in others {
        lines.push(format!("    {} ({})", ctx.path(*other)?, other));
    }
    Ok(lines)
}

fn dump_dependencies(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let guard = ctx.read_store(store)?;
    write_header(ctx, store);

    let mut reversed: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    let mut it = guard.create_iterator();
    it.seek_to_first();
    while it.is_valid() {
        ctx.check_abort()?;
        let record = decode_file_id(it.key()).and_then(|id| Ok((id, it.value::<BTreeSet<u32>>()?)));
        match record {
            Ok((file_id, deps)) => {
                let lines = dependency_block(ctx, file_id, "depends on", &deps)?;
                ctx.write_record(lines);
                for dep in deps {
                    reversed.entry(dep).or_default().insert(file_id);
                }
            }
            Err(err) => warn!(%err, "skipping corrupt dependency record"),
        }
        it.next();
    }
    drop(guard);

    for (file_id, dependents) in &reversed {
        ctx.check_abort()?;
        let lines = dependency_block(ctx, *file_id, "is depended on by", dependents)?;
        ctx.write_record(lines);
    }
    Ok(())
}

fn dump_symbols(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    // Rendering may read source files, so decode under the lock and render
    // after releasing it.
    let mut records = vec![];
    {
        let guard = ctx.read_store(store)?;
        write_header(ctx, store);

        let mut it = guard.create_iterator();
        it.seek_to_first();
        while it.is_valid() {
            ctx.check_abort()?;
            let record = Location::from_key(it.key()).and_then(|loc| Ok((loc, it.value::<CursorInfo>()?)));
            match record {
                Ok(record) => records.push(record),
                Err(err) => warn!(%err, "skipping corrupt symbol record"),
            }
            it.next();
        }
    }

    for (location, info) in records {
        ctx.check_abort()?;
        let mut lines = vec![format!(
            "  {}: {} {}{}",
            ctx.location_key(&location)?,
            info.kind,
            info.symbol_name,
            if info.is_definition { " definition" } else { "" }
        )];
        for target in &info.targets {
            lines.push(format!("    target: {}", ctx.location_key(target)?));
        }
        for reference in &info.references {
            lines.push(format!("    reference: {}", ctx.location_key(reference)?));
        }
        ctx.write_record(lines);
    }
    Ok(())
}

fn dump_symbol_names(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let mut records = vec![];
    {
        let guard = ctx.read_store(store)?;
        write_header(ctx, store);

        let mut it = guard.create_iterator();
        it.seek_to_first();
        while it.is_valid() {
            ctx.check_abort()?;
            match it.value::<BTreeSet<Location>>() {
                Ok(locations) => records.push((String::from_utf8_lossy(it.key()).into_owned(), locations)),
                Err(err) => warn!(%err, "skipping corrupt symbol name record"),
            }
            it.next();
        }
    }

    for (name, locations) in records {
        ctx.check_abort()?;
        let mut lines = vec![format!("  {}:", name)];
        for location in &locations {
            lines.push(format!("    {}", ctx.location_key(location)?));
        }
        ctx.write_record(lines);
    }
    Ok(())
}

fn dump_file_infos(ctx: &mut JobContext, store: &Store) -> Result<()> {
    ctx.check_abort()?;
    let guard = ctx.read_store(store)?;
    write_header(ctx, store);

    let mut it = guard.create_iterator();
    it.seek_to_first();
    while it.is_valid() {
        ctx.check_abort()?;
        let record = decode_file_id(it.key()).and_then(|id| Ok((id, it.value::<FileInformation>()?)));
        match record {
            Ok((file_id, info)) => {
                let line = format!(
                    "  {}: last compiled: {} compile args: {}",
                    ctx.path(file_id)?,
                    time_to_string(info.last_touched),
                    info.compile_args.join(" ")
                );
                ctx.write_record(vec![line]);
            }
            Err(err) => warn!(%err, "skipping corrupt file information record"),
        }
        it.next();
    }
    Ok(())
}

fn dump_visited_files(ctx: &mut JobContext, project: &Arc<Project>) -> Result<()> {
    ctx.check_abort()?;
    ctx.write(DELIMITER);
    ctx.write("visitedfiles");
    ctx.check_abort()?;
    let visited = match project.indexer() {
        Some(indexer) => indexer.visited_files(),
        None => return Ok(()),
    };
    for file_id in visited {
        ctx.check_abort()?;
        let line = format!("  {}: {}", ctx.path(file_id)?, file_id);
        ctx.write_record(vec![line]);
    }
    Ok(())
}
