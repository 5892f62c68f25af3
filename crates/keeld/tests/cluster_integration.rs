//! Cluster integration tests.
//!
//! Whole clusters run in-process: every node has its own in-memory local
//! store and all of them share one `MemoryKv`. Time is paused so lease and
//! membership TTLs elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use keel_cluster::{CampaignOutcome, ClusterContext, Elector};
use keel_core::{ClusterConfig, KeelConfig, Policy, PolicyContainer, PolicyPlacement};
use keel_kv::{KvStore, MemoryKv};
use keel_state::{Conn, Container, Minion, Role, TableType};
use keeld::{Node, NodeSpec, Simulation};
use tokio::sync::watch;

async fn eventually(secs: u64, mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..secs * 10 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    cond()
}

fn policy(n: usize) -> Policy {
    Policy {
        containers: (0..n)
            .map(|i| PolicyContainer {
                stitch_id: i.to_string(),
                image: "nginx".to_string(),
                labels: vec!["web".to_string()],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn containers(node: &Node) -> Vec<Container> {
    node.conn().select::<Container>(|_| true).unwrap()
}

fn master_ctx(kv: Arc<dyn KvStore>, ip: &str) -> ClusterContext {
    let conn = Conn::open_in_memory().unwrap();
    conn.transact(&[TableType::Minions], |view| {
        view.insert_row(Minion {
            role: Role::Master,
            private_ip: ip.to_string(),
            is_self: true,
            ..Default::default()
        })?;
        Ok(())
    })
    .unwrap();
    ClusterContext::new(conn, kv, ClusterConfig::default())
}

// ── Election ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn exactly_one_candidate_wins() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let mut electors: Vec<Elector> = (1..=5)
        .map(|i| Elector::new(master_ctx(kv.clone(), &format!("10.0.0.{i}"))))
        .collect();

    let outcomes: Vec<CampaignOutcome> = electors.iter_mut().map(|e| e.campaign_once()).collect();
    let winners = outcomes.iter().filter(|o| **o == CampaignOutcome::Leader).count();
    assert_eq!(winners, 1);
    assert_eq!(outcomes[0], CampaignOutcome::Leader);

    // Repeated rounds keep the same single leader.
    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(15)).await;
        let outcomes: Vec<CampaignOutcome> = electors.iter_mut().map(|e| e.campaign_once()).collect();
        assert_eq!(outcomes[0], CampaignOutcome::Leader);
        assert!(outcomes[1..].iter().all(|o| *o == CampaignOutcome::Follower));
    }
}

#[tokio::test(start_paused = true)]
async fn simulated_cluster_agrees_on_leader() {
    let sim = Simulation::new(KeelConfig::default(), 3, 2).unwrap();
    let (tx, rx) = watch::channel(false);
    let handles = sim.start(rx);

    assert!(eventually(60, || sim.leaders().len() == 1).await);
    let leader_ip = sim.leaders()[0].spec.private_ip.clone();
    assert!(
        eventually(60, || sim.nodes.iter().all(|n| {
            n.conn().leadership().unwrap().unwrap().leader_ip == leader_ip
        }))
        .await
    );

    // Stays unique across several lease periods.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(sim.leaders().len(), 1);
    assert_eq!(sim.leaders()[0].spec.private_ip, leader_ip);

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
}

// ── End to end ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn policy_is_placed_and_replicated() {
    let config = KeelConfig {
        policy: policy(4),
        ..Default::default()
    };
    let sim = Simulation::new(config, 2, 2).unwrap();
    let (tx, rx) = watch::channel(false);
    let handles = sim.start(rx);

    let placed = |n: &Node| {
        let rows = containers(n);
        rows.len() == 4 && rows.iter().all(|c| !c.minion.is_empty())
    };
    assert!(eventually(120, || sim.leaders().first().is_some_and(|l| placed(*l))).await);

    // Each worker sees exactly its own containers.
    let workers: Vec<&Node> = sim.nodes.iter().filter(|n| n.spec.role == Role::Worker).collect();
    assert!(
        eventually(60, || {
            workers.iter().map(|w| containers(w).len()).sum::<usize>() == 4
        })
        .await
    );
    for w in &workers {
        assert!(containers(w).iter().all(|c| c.minion == w.spec.private_ip));
    }

    // The follower master mirrors everything.
    let follower = sim
        .nodes
        .iter()
        .find(|n| n.spec.role == Role::Master && !n.conn().is_leader().unwrap())
        .unwrap();
    assert!(eventually(60, || placed(follower)).await);

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn region_rules_steer_placement() {
    let config = KeelConfig {
        policy: Policy {
            placements: vec![PolicyPlacement {
                target_label: "web".to_string(),
                region: "eu-west-1".to_string(),
                ..Default::default()
            }],
            ..policy(3)
        },
        ..Default::default()
    };
    let specs = [
        NodeSpec::new(Role::Master, "10.0.0.1"),
        NodeSpec::new(Role::Worker, "10.0.1.1").with_region("us-east-1"),
        NodeSpec::new(Role::Worker, "10.0.1.2").with_region("eu-west-1"),
    ];
    let sim = Simulation::with_specs(config, specs).unwrap();
    let (tx, rx) = watch::channel(false);
    let handles = sim.start(rx);

    let master = &sim.nodes[0];
    assert!(
        eventually(120, || {
            let rows = containers(master);
            rows.len() == 3 && rows.iter().all(|c| c.minion == "10.0.1.2")
        })
        .await
    );
    assert!(eventually(60, || containers(&sim.nodes[2]).len() == 3).await);
    assert!(containers(&sim.nodes[1]).is_empty());

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
}

// ── Failover ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn follower_takes_over_when_leader_stops() {
    let config = KeelConfig {
        policy: policy(2),
        ..Default::default()
    };
    let sim = Simulation::new(config.clone(), 2, 1).unwrap();
    let policy = Arc::new(config.policy.clone());

    // Separate shutdown per node so one can be stopped alone.
    let mut nodes = Vec::new();
    for node in &sim.nodes {
        let (tx, rx) = watch::channel(false);
        let handles = node.spawn(policy.clone(), rx);
        nodes.push((node, tx, handles));
    }

    assert!(eventually(60, || sim.leaders().len() == 1).await);
    let old = sim
        .nodes
        .iter()
        .position(|n| n.conn().is_leader().unwrap())
        .unwrap();
    let worker = sim.nodes.iter().position(|n| n.spec.role == Role::Worker).unwrap();
    assert!(eventually(120, || containers(&sim.nodes[worker]).len() == 2).await);

    let (_, tx, handles) = nodes.remove(old);
    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }

    let successor = sim
        .nodes
        .iter()
        .enumerate()
        .position(|(i, n)| i != old && n.spec.role == Role::Master)
        .unwrap();
    let new_ip = sim.nodes[successor].spec.private_ip.clone();
    assert!(eventually(120, || sim.nodes[successor].conn().is_leader().unwrap()).await);
    assert!(
        eventually(60, || {
            sim.nodes[worker].conn().leadership().unwrap().unwrap().leader_ip == new_ip
        })
        .await
    );

    // The new leader keeps the existing assignments.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let rows = containers(&sim.nodes[worker]);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|c| c.minion == sim.nodes[worker].spec.private_ip));

    for (_, tx, handles) in nodes {
        tx.send(true).unwrap();
        for h in handles {
            h.await.unwrap();
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cluster_runs_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.toml");
    std::fs::write(
        &path,
        r#"
[cluster]
election_ttl_secs = 10
minion_timeout_secs = 10

[[policy.containers]]
stitch_id = "1"
image = "redis"
labels = ["cache"]
"#,
    )
    .unwrap();

    let config = KeelConfig::from_file(&path).unwrap();
    assert_eq!(config.cluster.election_ttl_secs, 10);
    let sim = Simulation::new(config, 1, 1).unwrap();
    let (tx, rx) = watch::channel(false);
    let handles = sim.start(rx);

    assert!(
        eventually(60, || {
            let rows = containers(&sim.nodes[1]);
            rows.len() == 1 && rows[0].image == "redis"
        })
        .await
    );

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
}
