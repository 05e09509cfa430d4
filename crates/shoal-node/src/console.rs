use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use shoal_cache::GridMember;
use shoal_commands::payload::decode_counter;
use shoal_commands::Delta;
use shoal_remoting::LocalNetwork;
use shoal_types::{Address, Metadata};

const HELP: &str = "\
commands:
  put <key> <value> [ttl_ms]    store a value
  get <key>                     read a value
  putifabsent <key> <value>     store unless present
  replace <key> <value>         overwrite an existing value
  remove <key>                  delete a key
  incr <key> <n>                add n to a counter
  append <key> <value>          append bytes to a value
  tx <key>=<value> ...          put several keys in one transaction
  clear                         remove everything
  use <member>                  issue operations on another member
  split <a,b> <c> ...           partition the network
  heal                          merge all partitions
  status                        availability and topology per member
  stats                         statistics of the current member
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put { key: String, value: String, lifespan_ms: Option<u64> },
    Get(String),
    PutIfAbsent { key: String, value: String },
    Replace { key: String, value: String },
    Remove(String),
    Incr { key: String, by: i64 },
    Append { key: String, value: String },
    Tx(Vec<(String, String)>),
    Clear,
    Use(String),
    Split(Vec<Vec<String>>),
    Heal,
    Status,
    Stats,
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> anyhow::Result<Option<Op>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = words.split_first() else {
        return Ok(None);
    };
    let arg = |i: usize, name: &str| -> anyhow::Result<String> {
        args.get(i)
            .map(|s| s.to_string())
            .with_context(|| format!("{cmd}: missing <{name}>"))
    };

    let op = match cmd.to_ascii_lowercase().as_str() {
        "put" => Op::Put {
            key: arg(0, "key")?,
            value: arg(1, "value")?,
            lifespan_ms: match args.get(2) {
                Some(s) => Some(s.parse().with_context(|| format!("put: invalid ttl '{s}'"))?),
                None => None,
            },
        },
        "get" => Op::Get(arg(0, "key")?),
        "putifabsent" => Op::PutIfAbsent { key: arg(0, "key")?, value: arg(1, "value")? },
        "replace" => Op::Replace { key: arg(0, "key")?, value: arg(1, "value")? },
        "remove" | "rm" => Op::Remove(arg(0, "key")?),
        "incr" => {
            let by = arg(1, "n")?;
            Op::Incr {
                key: arg(0, "key")?,
                by: by.parse().with_context(|| format!("incr: invalid amount '{by}'"))?,
            }
        }
        "append" => Op::Append { key: arg(0, "key")?, value: arg(1, "value")? },
        "tx" => {
            if args.is_empty() {
                bail!("tx: expected at least one <key>=<value>");
            }
            let pairs = args
                .iter()
                .map(|a| {
                    a.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .with_context(|| format!("tx: expected <key>=<value>, got '{a}'"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Op::Tx(pairs)
        }
        "clear" => Op::Clear,
        "use" => Op::Use(arg(0, "member")?),
        "split" => {
            if args.len() < 2 {
                bail!("split: expected at least two partitions");
            }
            Op::Split(
                args.iter()
                    .map(|g| g.split(',').filter(|m| !m.is_empty()).map(str::to_string).collect())
                    .collect(),
            )
        }
        "heal" => Op::Heal,
        "status" => Op::Status,
        "stats" => Op::Stats,
        "help" | "?" => Op::Help,
        "quit" | "exit" => Op::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(op))
}

fn show(value: Option<Vec<u8>>) -> String {
    match value {
        Some(v) => String::from_utf8_lossy(&v).into_owned(),
        None => "(nil)".to_string(),
    }
}

/// Line-oriented operator console over an in-process grid.
pub struct Console {
    network: Arc<LocalNetwork>,
    members: Vec<GridMember>,
    active: usize,
}

impl Console {
    pub fn new(network: Arc<LocalNetwork>, members: Vec<GridMember>) -> Self {
        Console { network, members, active: 0 }
    }

    pub fn select(&mut self, name: &str) -> anyhow::Result<()> {
        match self.members.iter().position(|m| m.address().as_str() == name) {
            Some(i) => {
                self.active = i;
                Ok(())
            }
            None => bail!("unknown member '{name}'"),
        }
    }

    fn member(&self) -> &GridMember {
        &self.members[self.active]
    }

    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            output
                .write_all(format!("shoal[{}]> ", self.member().address()).as_bytes())
                .await?;
            output.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let reply = match parse(&line) {
                Ok(None) => continue,
                Ok(Some(Op::Quit)) => break,
                Ok(Some(op)) => match self.execute(op).await {
                    Ok(text) => text,
                    Err(e) => format!("error: {e:#}"),
                },
                Err(e) => format!("error: {e:#}"),
            };
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
        }
        output.flush().await?;
        Ok(())
    }

    pub async fn execute(&mut self, op: Op) -> anyhow::Result<String> {
        let cache = Arc::clone(self.member().cache());
        let text = match op {
            Op::Put { key, value, lifespan_ms } => {
                let previous = match lifespan_ms {
                    Some(ms) => {
                        cache
                            .put_with_metadata(key, value.into_bytes(), Metadata::default().with_lifespan_ms(ms))
                            .await?
                    }
                    None => cache.put(key, value.into_bytes()).await?,
                };
                format!("OK (previous: {})", show(previous))
            }
            Op::Get(key) => show(cache.get(key).await?),
            Op::PutIfAbsent { key, value } => {
                let r = cache.put_if_absent(key, value.into_bytes()).await?;
                if r.successful {
                    "OK".to_string()
                } else {
                    format!("present: {}", show(r.value))
                }
            }
            Op::Replace { key, value } => match cache.replace(key, value.into_bytes()).await? {
                Some(previous) => format!("OK (previous: {})", show(Some(previous))),
                None => "not present".to_string(),
            },
            Op::Remove(key) => show(cache.remove(key).await?),
            Op::Incr { key, by } => {
                cache.apply_delta(key.clone(), Delta::Increment(by)).await?;
                match cache.get(key).await? {
                    Some(v) => decode_counter(&v)?.to_string(),
                    None => "(nil)".to_string(),
                }
            }
            Op::Append { key, value } => {
                cache.apply_delta(key.clone(), Delta::Append(value.into_bytes())).await?;
                show(cache.get(key).await?)
            }
            Op::Tx(pairs) => {
                let n = pairs.len();
                let mut tx = cache.begin();
                for (k, v) in pairs {
                    tx.put(k, v.into_bytes());
                }
                let gtx = tx.gtx().to_string();
                cache.commit(tx).await?;
                format!("committed {n} writes in {gtx}")
            }
            Op::Clear => {
                cache.clear().await?;
                "OK".to_string()
            }
            Op::Use(name) => {
                self.select(&name)?;
                format!("using {name}")
            }
            Op::Split(groups) => {
                let known = self.network.all_members();
                let partitions: Vec<Vec<Address>> = groups
                    .into_iter()
                    .map(|g| g.into_iter().map(Address::new).collect())
                    .collect();
                for a in partitions.iter().flatten() {
                    if !known.contains(a) {
                        bail!("unknown member '{a}'");
                    }
                }
                self.network.split(&partitions);
                self.status()
            }
            Op::Heal => {
                self.network.heal();
                self.status()
            }
            Op::Status => self.status(),
            Op::Stats => {
                let stats = serde_json::json!({
                    "member": self.member().address().as_str(),
                    "cache": cache.statistics(),
                    "rpc": cache.rpc_statistics().snapshot(),
                    "locks_held": cache.locks().len(),
                    "transactions": cache.transactions().len(),
                });
                serde_json::to_string_pretty(&stats)?
            }
            Op::Help => HELP.to_string(),
            Op::Quit => String::new(),
        };
        Ok(text)
    }

    fn status(&self) -> String {
        let mut out = String::new();
        for (i, m) in self.members.iter().enumerate() {
            let cache = m.cache();
            let topology = cache.topology().current();
            let view: Vec<String> = cache
                .partition_handling_manager()
                .availability()
                .members
                .iter()
                .map(Address::to_string)
                .collect();
            let _ = writeln!(
                out,
                "{} {:<10} {:<9} topology={} view=[{}]",
                if i == self.active { "*" } else { " " },
                m.address(),
                cache.availability(),
                topology.topology_id,
                view.join(","),
            );
        }
        out.trim_end().to_string()
    }

    /// Stop every member.
    pub fn shutdown(self) {
        for m in self.members {
            m.stop();
        }
    }
}
