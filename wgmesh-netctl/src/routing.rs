//! Route/firewall driver (section 4.D): diff-and-apply kernel routes, and keep
//! `ip_forward` and the interface's FORWARD rule in place.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::NetCtlResult;
use crate::executor::Executor;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DesiredRoute {
    pub network: String,
    pub gateway: String,
}

#[async_trait]
pub trait RouteDriver: Send + Sync {
    async fn sync_routes(&self, iface: &str, desired: &[DesiredRoute]) -> NetCtlResult<()>;
}

pub struct KernelRouteDriver {
    executor: Arc<dyn Executor>,
}

impl KernelRouteDriver {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        KernelRouteDriver { executor }
    }

    async fn current_routes(&self, iface: &str) -> NetCtlResult<HashSet<DesiredRoute>> {
        let output = self.executor.run("ip", &["route", "show", "dev", iface]).await?;
        let mut routes = HashSet::new();
        for line in output.stdout.lines() {
            let mut fields = line.split_whitespace();
            let Some(network) = fields.next() else { continue };
            let mut gateway = String::new();
            let mut tokens = fields;
            while let Some(tok) = tokens.next() {
                if tok == "via" {
                    if let Some(gw) = tokens.next() {
                        gateway = gw.to_string();
                    }
                }
            }
            routes.insert(DesiredRoute {
                network: network.to_string(),
                gateway,
            });
        }
        Ok(routes)
    }

    async fn ensure_ip_forward(&self) -> NetCtlResult<()> {
        let output = self.executor.run("sysctl", &["-n", "net.ipv4.ip_forward"]).await?;
        if output.stdout.trim() != "1" {
            self.executor.run("sysctl", &["-w", "net.ipv4.ip_forward=1"]).await?;
        }
        Ok(())
    }

    async fn ensure_forward_rule(&self, iface: &str) -> NetCtlResult<()> {
        let exists = self
            .executor
            .run("iptables", &["-C", "FORWARD", "-i", iface, "-j", "ACCEPT"])
            .await
            .is_ok();
        if !exists {
            self.executor
                .run("iptables", &["-A", "FORWARD", "-i", iface, "-j", "ACCEPT"])
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RouteDriver for KernelRouteDriver {
    async fn sync_routes(&self, iface: &str, desired: &[DesiredRoute]) -> NetCtlResult<()> {
        let current = self.current_routes(iface).await?;
        let desired_set: HashSet<DesiredRoute> = desired.iter().cloned().collect();

        for stale in current.difference(&desired_set) {
            debug!(network = %stale.network, "removing stale route");
            let _ = self
                .executor
                .run("ip", &["route", "del", &stale.network, "dev", iface])
                .await;
        }

        for route in desired_set.difference(&current) {
            info!(network = %route.network, gateway = %route.gateway, "adding route");
            self.executor
                .run(
                    "ip",
                    &["route", "replace", &route.network, "via", &route.gateway, "dev", iface],
                )
                .await?;
        }

        self.ensure_ip_forward().await?;
        self.ensure_forward_rule(iface).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, RecordingExecutor};

    #[tokio::test]
    async fn sync_routes_adds_missing_and_checks_forwarding() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.push_response(Ok(CommandOutput::default())); // current routes: empty
        exec.push_response(Ok(CommandOutput {
            stdout: "1".into(),
            stderr: String::new(),
        })); // ip_forward already 1
        let driver = KernelRouteDriver::new(exec.clone());

        driver
            .sync_routes(
                "wg-mesh0",
                &[DesiredRoute {
                    network: "10.1.0.0/24".into(),
                    gateway: "10.42.0.2".into(),
                }],
            )
            .await
            .unwrap();

        let invocations = exec.invocations();
        assert!(invocations.iter().any(|c| c.program == "ip" && c.args.contains(&"replace".to_string())));
    }
}
