//! Interactive storage console: one node at a time, one command per line.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use easystorage_core::{Engine, NodeConfig, Progress, ProgressFn, StorageNode};
use tracing::{debug, info};

const PROMPT: &str = "> ";

/// Name and description for `help`, in display order.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "prints this help message"),
    ("quit", "quits this program"),
    (
        "start",
        "[API_PORT] [DISC_PORT] [DATA_DIR] [BOOTSTRAP_NODE] creates and starts a node",
    ),
    ("stop", "stops and destroys the node"),
    ("upload", "[PATH] uploads a file to the node"),
    ("download", "[CID] [PATH] downloads content to a file"),
    ("spr", "prints the node's signed peer record"),
    ("delete", "[CID] removes content from the node"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Progress line on stdout, rewritten in place.
pub fn print_progress() -> ProgressFn {
    Box::new(|p: Progress| {
        let mut out = io::stdout().lock();
        let _ = if p.total > 0 {
            write!(out, "\r  {} / {} bytes", p.completed, p.total)
        } else {
            write!(out, "\r  {} bytes", p.completed)
        };
        let _ = out.flush();
    })
}

pub struct Console<W: Write> {
    engine: Arc<dyn Engine>,
    /// Settings not given on the `start` line (log level, NAT).
    base: NodeConfig,
    node: Option<StorageNode>,
    out: W,
    show_progress: bool,
}

impl<W: Write> Console<W> {
    pub fn new(engine: Arc<dyn Engine>, base: NodeConfig, out: W) -> Self {
        Self {
            engine,
            base,
            node: None,
            out,
            show_progress: true,
        }
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn is_running(&self) -> bool {
        self.node.is_some()
    }

    /// Read commands until `quit` or end of input. A running node is shut down either way.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        writeln!(
            self.out,
            "Welcome to storageconsole. Type 'help' for a list of commands."
        )?;
        let mut lines = input.lines();
        loop {
            write!(self.out, "{}", PROMPT)?;
            self.out.flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            if self.execute(&line?)? == Flow::Quit {
                return Ok(());
            }
        }
        writeln!(self.out)?;
        self.shutdown()
    }

    /// Run one command line.
    pub fn execute(&mut self, line: &str) -> io::Result<Flow> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        let (cmd, args) = match line.split_once(' ') {
            Some((cmd, rest)) => {
                let rest = rest.trim_start_matches(' ');
                (cmd, (!rest.is_empty()).then_some(rest))
            }
            None => (line, None),
        };
        debug!(cmd, "console command");
        match cmd {
            "help" => self.help()?,
            "quit" => {
                self.shutdown()?;
                writeln!(self.out, "Quitting...")?;
                return Ok(Flow::Quit);
            }
            "start" => self.start(args)?,
            "stop" => self.stop()?,
            "upload" => self.upload(args)?,
            "download" => self.download(args)?,
            "spr" => self.spr()?,
            "delete" => self.delete(args)?,
            _ => writeln!(self.out, "Invalid command: {}", cmd)?,
        }
        Ok(Flow::Continue)
    }

    fn help(&mut self) -> io::Result<()> {
        writeln!(self.out, "Commands:")?;
        for (name, desc) in COMMANDS {
            writeln!(self.out, " [{}]: {}", name, desc)?;
        }
        Ok(())
    }

    fn start(&mut self, args: Option<&str>) -> io::Result<()> {
        if self.node.is_some() {
            return writeln!(self.out, "Node already running. Stop it first.");
        }
        let Some(config) = args.and_then(|a| self.start_config(a)) else {
            return writeln!(
                self.out,
                "Usage: start [API_PORT] [DISC_PORT] [DATA_DIR] [BOOTSTRAP_NODE]"
            );
        };

        writeln!(self.out, "Creating node...")?;
        let node = match StorageNode::new(self.engine.clone(), &config) {
            Ok(node) => node,
            Err(e) => {
                debug!(error = %e, "create failed");
                return writeln!(self.out, "Failed to create node.");
            }
        };

        writeln!(self.out, "Starting node...")?;
        if let Err(e) = node.start() {
            debug!(error = %e, "start failed");
            // Dropping the node destroys it.
            drop(node);
            return writeln!(self.out, "Failed to start node.");
        }

        info!(
            api_port = config.api_port,
            disc_port = config.disc_port,
            "node started"
        );
        self.node = Some(node);
        writeln!(
            self.out,
            "Node started on API port {}, discovery port {}.",
            config.api_port, config.disc_port
        )
    }

    /// `API_PORT DISC_PORT DATA_DIR [BOOTSTRAP_NODE]` on top of the base config.
    fn start_config(&self, args: &str) -> Option<NodeConfig> {
        let mut parts = args.split_whitespace();
        let api_port = parts.next()?.parse().ok()?;
        let disc_port = parts.next()?.parse().ok()?;
        let data_dir = PathBuf::from(parts.next()?);
        let bootstrap_node = parts.next().map(str::to_string);
        Some(NodeConfig {
            api_port,
            disc_port,
            data_dir: Some(data_dir),
            bootstrap_node,
            ..self.base.clone()
        })
    }

    fn stop(&mut self) -> io::Result<()> {
        if self.node.is_none() {
            return writeln!(self.out, "No node running.");
        }
        self.shutdown()?;
        writeln!(self.out, "Node stopped.")
    }

    /// Stop and destroy the running node, if any. Failures are logged, not reported.
    fn shutdown(&mut self) -> io::Result<()> {
        let Some(mut node) = self.node.take() else {
            return Ok(());
        };
        writeln!(self.out, "Stopping node...")?;
        if let Err(e) = node.stop() {
            debug!(error = %e, "stop failed");
        }
        if let Err(e) = node.destroy() {
            debug!(error = %e, "destroy failed");
        }
        Ok(())
    }

    fn running(&mut self) -> io::Result<Option<&StorageNode>> {
        if self.node.is_none() {
            writeln!(self.out, "No node running. Start one first.")?;
        }
        Ok(self.node.as_ref())
    }

    fn progress(&self) -> Option<ProgressFn> {
        self.show_progress.then(print_progress)
    }

    fn end_progress(&mut self) -> io::Result<()> {
        if self.show_progress {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn upload(&mut self, args: Option<&str>) -> io::Result<()> {
        if self.running()?.is_none() {
            return Ok(());
        }
        let Some(arg) = args else {
            return writeln!(self.out, "Usage: upload [PATH]");
        };
        let Ok(path) = std::fs::canonicalize(arg) else {
            return writeln!(self.out, "File not found: {}", arg);
        };

        writeln!(self.out, "Uploading {}...", path.display())?;
        let progress = self.progress();
        let result = match &self.node {
            Some(node) => node.upload(&path, progress),
            None => return Ok(()),
        };
        self.end_progress()?;
        match result {
            Ok(cid) => writeln!(self.out, "CID: {}", cid),
            Err(e) => {
                debug!(error = %e, "upload failed");
                writeln!(self.out, "Upload failed.")
            }
        }
    }

    fn download(&mut self, args: Option<&str>) -> io::Result<()> {
        if self.running()?.is_none() {
            return Ok(());
        }
        let mut parts = args.unwrap_or_default().split_whitespace();
        let (Some(cid), Some(dest)) = (parts.next(), parts.next()) else {
            return writeln!(self.out, "Usage: download [CID] [PATH]");
        };

        writeln!(self.out, "Downloading {} to {}...", cid, dest)?;
        let progress = self.progress();
        let result = match &self.node {
            Some(node) => node.download(cid, dest, progress),
            None => return Ok(()),
        };
        self.end_progress()?;
        match result {
            Ok(()) => writeln!(self.out, "Download complete."),
            Err(e) => {
                debug!(error = %e, "download failed");
                writeln!(self.out, "Download failed.")
            }
        }
    }

    fn spr(&mut self) -> io::Result<()> {
        let result = match self.running()? {
            Some(node) => node.spr(),
            None => return Ok(()),
        };
        match result {
            Ok(spr) => writeln!(self.out, "SPR: {}", spr),
            Err(e) => {
                debug!(error = %e, "spr failed");
                writeln!(self.out, "Failed to get SPR.")
            }
        }
    }

    fn delete(&mut self, args: Option<&str>) -> io::Result<()> {
        if self.running()?.is_none() {
            return Ok(());
        }
        let Some(cid) = args.and_then(|a| a.split_whitespace().next()) else {
            return writeln!(self.out, "Usage: delete [CID]");
        };
        let result = match &self.node {
            Some(node) => node.delete(cid),
            None => return Ok(()),
        };
        match result {
            Ok(()) => writeln!(self.out, "Deleted {}.", cid),
            Err(e) => {
                debug!(error = %e, "delete failed");
                writeln!(self.out, "Delete failed.")
            }
        }
    }
}
