//! Command handlers for the MeshChat CLI

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use meshchat_core::{AppEvent, MeshChatConfig, MessageStatus, PeerIdentity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::simulation::{describe, parse_nodes, Simulation};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const SETTLE_TIME: Duration = Duration::from_millis(100);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, config: MeshChatConfig) -> Result<()> {
        match cli.command {
            Commands::Simulate {
                nodes,
                from,
                to,
                message,
                late_link,
                timeout_secs,
            } => {
                let plan = SimulationPlan::new(&nodes, from, to, message, late_link, timeout_secs)?;
                Self::handle_simulate(plan, config).await
            }
            Commands::Interactive { nodes } => Self::handle_interactive(&nodes, config).await,
            Commands::Config => Self::handle_config(&config),
        }
    }

    /// Send one message across a line of nodes and follow it to a final state
    async fn handle_simulate(plan: SimulationPlan, config: MeshChatConfig) -> Result<()> {
        let mut sim = Simulation::start(plan.nodes.clone(), &config)?;
        println!(
            "MeshChat simulation: {}",
            plan.nodes
                .iter()
                .map(PeerIdentity::as_str)
                .collect::<Vec<_>>()
                .join(" - ")
        );

        if !plan.late_link {
            sim.link_line()?;
            sleep(SETTLE_TIME).await;
            print_events(sim.drain_events());
        }

        let id = sim.send(&plan.from, &plan.to, &plan.message).await?;
        println!("{} -> {}: {:?} (id {})", plan.from, plan.to, plan.message, id.short());

        let deadline = Instant::now() + plan.timeout;
        let mut linked = !plan.late_link;
        let mut final_status = None;

        while Instant::now() < deadline && final_status.is_none() {
            sleep(POLL_INTERVAL).await;
            for (node, event) in sim.drain_events() {
                println!("  [{}] {}", node, describe(&event));
                match event {
                    AppEvent::StatusChanged {
                        id: changed,
                        status,
                        ..
                    } if node == plan.from && changed == id => {
                        if status == MessageStatus::Stored && !linked {
                            info!("bringing the mesh up");
                            sim.link_line()?;
                            linked = true;
                        }
                        if status.is_terminal() {
                            final_status = Some(status);
                        }
                    }
                    AppEvent::DeliveryExpired { id: expired, .. } if expired == id => {
                        final_status = Some(MessageStatus::Expired);
                    }
                    _ => {}
                }
            }
        }

        match final_status {
            Some(status) => println!("final status: {}", status),
            None => println!("no final status after {}s", plan.timeout.as_secs()),
        }

        for identity in sim.identities().to_vec() {
            sim.node(&identity)?.request_status().await?;
        }
        sleep(SETTLE_TIME).await;
        for (node, event) in sim.drain_events() {
            if let AppEvent::SystemStatusReport { .. } = event {
                println!("  {}: {}", node, describe(&event));
            }
        }

        sim.shutdown().await;
        Ok(())
    }

    /// Line-oriented control of a simulated mesh
    async fn handle_interactive(nodes: &[String], config: MeshChatConfig) -> Result<()> {
        let identities = parse_nodes(nodes)?;
        let mut sim = Simulation::start(identities, &config)?;
        println!("MeshChat interactive simulation. Type 'help' for commands.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            let input = match InteractiveCommand::parse(&line) {
                Ok(Some(input)) => input,
                Ok(None) => continue,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            if let Err(e) = Self::run_interactive(&sim, input.clone()).await {
                println!("error: {}", e);
            }
            if input == InteractiveCommand::Quit {
                break;
            }

            sleep(SETTLE_TIME).await;
            print_events(sim.drain_events());
        }

        sim.shutdown().await;
        Ok(())
    }

    async fn run_interactive(sim: &Simulation, command: InteractiveCommand) -> Result<()> {
        match command {
            InteractiveCommand::Help => println!("{}", InteractiveCommand::HELP),
            InteractiveCommand::Nodes => {
                for identity in sim.identities() {
                    println!("  {}", identity);
                }
            }
            InteractiveCommand::Link(a, b) => sim.link(&a, &b)?,
            InteractiveCommand::Unlink(a, b) => {
                if !sim.unlink(&a, &b) {
                    println!("{} and {} are not linked", a, b);
                }
            }
            InteractiveCommand::Send { from, to, text } => {
                let id = sim.send(&from, &to, &text).await?;
                println!("queued {}", id.short());
            }
            InteractiveCommand::History(node, peer) => {
                sim.node(&node)?.request_conversation(peer).await?
            }
            InteractiveCommand::Status(node) => sim.node(&node)?.request_status().await?,
            InteractiveCommand::Retry(node) => sim.node(&node)?.retry_now().await?,
            InteractiveCommand::Quit => {}
        }
        Ok(())
    }

    fn handle_config(config: &MeshChatConfig) -> Result<()> {
        print!("{}", config.to_toml_string()?);
        Ok(())
    }
}

fn print_events(events: Vec<(PeerIdentity, AppEvent)>) {
    for (node, event) in events {
        println!("  [{}] {}", node, describe(&event));
    }
}

// ----------------------------------------------------------------------------
// Simulation Plan
// ----------------------------------------------------------------------------

/// Validated arguments of the `simulate` command
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub nodes: Vec<PeerIdentity>,
    pub from: PeerIdentity,
    pub to: PeerIdentity,
    pub message: String,
    pub late_link: bool,
    pub timeout: Duration,
}

impl SimulationPlan {
    pub fn new(
        names: &[String],
        from: Option<String>,
        to: Option<String>,
        message: String,
        late_link: bool,
        timeout_secs: u64,
    ) -> Result<Self> {
        let nodes = parse_nodes(names)?;
        let pick = |name: Option<String>, fallback: &PeerIdentity| -> Result<PeerIdentity> {
            match name {
                Some(name) => {
                    let identity = PeerIdentity::new(name)?;
                    if !nodes.contains(&identity) {
                        bail!("{} is not one of the simulated nodes", identity);
                    }
                    Ok(identity)
                }
                None => Ok(fallback.clone()),
            }
        };

        let first = nodes.first().ok_or_else(|| anyhow!("no nodes"))?;
        let last = nodes.last().ok_or_else(|| anyhow!("no nodes"))?;
        let from = pick(from, first)?;
        let to = pick(to, last)?;
        if from == to {
            bail!("sender and receiver must differ");
        }

        Ok(Self {
            from,
            to,
            message,
            late_link,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            nodes,
        })
    }
}

// ----------------------------------------------------------------------------
// Interactive Commands
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Help,
    Nodes,
    Link(PeerIdentity, PeerIdentity),
    Unlink(PeerIdentity, PeerIdentity),
    Send {
        from: PeerIdentity,
        to: PeerIdentity,
        text: String,
    },
    History(PeerIdentity, PeerIdentity),
    Status(PeerIdentity),
    Retry(PeerIdentity),
    Quit,
}

impl InteractiveCommand {
    pub const HELP: &'static str = "\
  link <a> <b>            bring two nodes into range
  unlink <a> <b>          take two nodes out of range
  send <from> <to> <text> send a message
  history <node> <peer>   show a conversation
  status <node>           show router counters
  retry <node>            run a retry sweep now
  nodes                   list nodes
  quit";

    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();
        let identity = |index: usize| -> Result<PeerIdentity> {
            let name = args
                .get(index)
                .ok_or_else(|| anyhow!("usage:\n{}", Self::HELP))?;
            Ok(PeerIdentity::new(*name)?)
        };

        let command = match verb {
            "help" | "?" => Self::Help,
            "nodes" => Self::Nodes,
            "link" => Self::Link(identity(0)?, identity(1)?),
            "unlink" => Self::Unlink(identity(0)?, identity(1)?),
            "send" => {
                let from = identity(0)?;
                let to = identity(1)?;
                let text = rest
                    .trim_start()
                    .splitn(3, char::is_whitespace)
                    .nth(2)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                Self::Send { from, to, text }
            }
            "history" => Self::History(identity(0)?, identity(1)?),
            "status" => Self::Status(identity(0)?),
            "retry" => Self::Retry(identity(0)?),
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command {:?}, try 'help'", other),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    #[test]
    fn parses_send_with_spaces_in_text() {
        let command = InteractiveCommand::parse("send alice bob hello there  friend")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            InteractiveCommand::Send {
                from: id("alice"),
                to: id("bob"),
                text: "hello there  friend".to_string(),
            }
        );
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(InteractiveCommand::parse("   ").unwrap(), None);
        assert_eq!(
            InteractiveCommand::parse("link a b").unwrap(),
            Some(InteractiveCommand::Link(id("a"), id("b")))
        );
        assert_eq!(
            InteractiveCommand::parse("quit").unwrap(),
            Some(InteractiveCommand::Quit)
        );
        assert!(InteractiveCommand::parse("link a").is_err());
        assert!(InteractiveCommand::parse("dance").is_err());
    }

    #[test]
    fn plan_defaults_to_line_ends() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let plan = SimulationPlan::new(&names, None, None, "hi".into(), false, 5).unwrap();
        assert_eq!(plan.from, id("a"));
        assert_eq!(plan.to, id("c"));

        assert!(SimulationPlan::new(&names, Some("z".into()), None, "hi".into(), false, 5).is_err());
        assert!(
            SimulationPlan::new(&names, Some("c".into()), None, "hi".into(), false, 5).is_err()
        );
    }
}
