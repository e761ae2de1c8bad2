//! The dispatcher: routes every incoming job to one of the servers.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use parse_display::Display;
use rand::Rng;

use crate::sim::Mailbox;
use crate::types::{Message, ServerId};
use crate::utils::prelude::*;
use crate::workers::Cluster;

/// How the dispatcher picks a server for each job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RoutingPolicy {
    /// uniformly at random
    #[display("random")]
    Random,
    /// the server with the fewest jobs in system, lowest index on ties
    #[display("sqf")]
    ShortestQueueFirst,
    #[display("rr")]
    RoundRobin,
    /// the less loaded of two distinct random servers
    #[display("two-random-choices")]
    TwoRandomChoices,
    /// the less loaded of the round robin server and a distinct random one
    #[display("two-rr-random-choices")]
    TwoChoicesRoundRobinPlusRandom,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        RoutingPolicy::Random
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown policy `{}`", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for RoutingPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "random" => RoutingPolicy::Random,
            "sqf" => RoutingPolicy::ShortestQueueFirst,
            "rr" => RoutingPolicy::RoundRobin,
            "two-random-choices" | "two-random" => RoutingPolicy::TwoRandomChoices,
            "two-rr-random-choices" | "two-rr-random" => RoutingPolicy::TwoChoicesRoundRobinPlusRandom,
            _ => return Err(UnknownPolicy(s.to_owned())),
        })
    }
}

impl RoutingPolicy {
    /// Parse a user supplied token, falling back to the default with a warning
    pub fn parse_or_default(token: &str) -> Self {
        token.parse().unwrap_or_else(|err: UnknownPolicy| {
            let fallback = Self::default();
            warn!(%err, %fallback, "unknown dispatch policy, falling back to `{}`", fallback);
            fallback
        })
    }
}

/// What the router needs to know before it can decide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// decided without looking at the load
    Fixed(ServerId),
    /// the less loaded of the two, the first one on ties
    Pair(ServerId, ServerId),
    /// the least loaded of all servers, the lowest index on ties
    Scan,
}

impl Choice {
    /// Servers whose load must be read, in order
    pub fn candidates(&self, servers: usize) -> Vec<ServerId> {
        match *self {
            Choice::Fixed(_) => vec![],
            Choice::Pair(a, b) => vec![a, b],
            Choice::Scan => (0..servers).collect(),
        }
    }

    /// Pick the server given the loads of [`Choice::candidates`], in the same order
    pub fn resolve(&self, loads: &[usize]) -> ServerId {
        match *self {
            Choice::Fixed(s) => s,
            Choice::Pair(a, b) => {
                if loads[0] <= loads[1] {
                    a
                } else {
                    b
                }
            }
            Choice::Scan => {
                let mut best = 0;
                for (i, load) in loads.iter().enumerate().skip(1) {
                    if *load < loads[best] {
                        best = i;
                    }
                }
                best
            }
        }
    }
}

/// Routing state: the policy, the round robin cursor and the random source
pub struct Router<R> {
    policy: RoutingPolicy,
    servers: usize,
    cursor: ServerId,
    rng: R,
}

impl<R: Rng> Router<R> {
    pub fn new(policy: RoutingPolicy, servers: usize, rng: R) -> Self {
        assert!(servers > 0, "router needs at least one server");
        Self {
            policy,
            servers,
            cursor: 0,
            rng,
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// Draw the random and round robin parts of the next decision
    pub fn draw(&mut self) -> Choice {
        match self.policy {
            RoutingPolicy::Random => Choice::Fixed(self.uniform()),
            RoutingPolicy::ShortestQueueFirst => Choice::Scan,
            RoutingPolicy::RoundRobin => Choice::Fixed(self.round_robin()),
            RoutingPolicy::TwoRandomChoices => {
                let a = self.uniform();
                let b = self.uniform_except(a);
                Choice::Pair(a, b)
            }
            RoutingPolicy::TwoChoicesRoundRobinPlusRandom => {
                let a = self.round_robin();
                let b = self.uniform_except(a);
                Choice::Pair(a, b)
            }
        }
    }

    fn uniform(&mut self) -> ServerId {
        self.rng.gen_range(0..self.servers)
    }

    /// A uniform index different from `a`, unless there is only one server
    fn uniform_except(&mut self, a: ServerId) -> ServerId {
        let mut b = self.uniform();
        while self.servers > 1 && b == a {
            b = self.uniform();
        }
        b
    }

    fn round_robin(&mut self) -> ServerId {
        let s = self.cursor;
        self.cursor = (self.cursor + 1) % self.servers;
        s
    }
}

/// Receive jobs from `inbox` and forward each to the server chosen by `router`. On shutdown,
/// every server gets its own shutdown marker.
pub async fn dispatcher<R: Rng>(
    inbox: Mailbox<Message>,
    mut router: Router<R>,
    cluster: Rc<Cluster>,
    servers: Vec<Mailbox<Message>>,
) {
    assert_eq!(servers.len(), cluster.len(), "one mailbox per server");
    let mut routed = vec![0usize; servers.len()];

    loop {
        let job = match inbox.get().await {
            Message::Job(job) => job,
            Message::Shutdown => break,
        };

        let choice = router.draw();
        let mut loads = Vec::new();
        for s in choice.candidates(cluster.len()) {
            // each read under that server's own lock, no global snapshot
            loads.push(cluster[s].in_system().await);
        }
        let target = choice.resolve(&loads);

        trace!(%job, server = target, ?choice, "route");
        routed[target] += 1;
        servers[target].put(Message::Job(job));
    }

    for mailbox in &servers {
        mailbox.put(Message::Shutdown);
    }
    debug!(policy = %router.policy(), total = routed.iter().sum::<usize>(), "dispatcher done");
    trace!(?routed, "jobs routed per server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_seeder::{Seeder, SipRng};

    fn router(policy: RoutingPolicy, servers: usize) -> Router<SipRng> {
        Router::new(policy, servers, Seeder::from("router tests").make_rng())
    }

    /// One routing decision, the same steps the dispatcher takes
    fn decide(r: &mut Router<SipRng>, load: impl Fn(ServerId) -> usize) -> ServerId {
        let choice = r.draw();
        let loads: Vec<_> = choice.candidates(r.servers).into_iter().map(load).collect();
        choice.resolve(&loads)
    }

    #[test]
    fn parse_tokens() {
        assert_eq!("random".parse(), Ok(RoutingPolicy::Random));
        assert_eq!("sqf".parse(), Ok(RoutingPolicy::ShortestQueueFirst));
        assert_eq!("rr".parse(), Ok(RoutingPolicy::RoundRobin));
        assert_eq!("two-random-choices".parse(), Ok(RoutingPolicy::TwoRandomChoices));
        assert_eq!("two-random".parse(), Ok(RoutingPolicy::TwoRandomChoices));
        assert_eq!(
            "two-rr-random-choices".parse(),
            Ok(RoutingPolicy::TwoChoicesRoundRobinPlusRandom)
        );
        assert_eq!(
            "two-rr-random".parse::<RoutingPolicy>(),
            Ok(RoutingPolicy::TwoChoicesRoundRobinPlusRandom)
        );
        assert_eq!(
            "SQF".parse::<RoutingPolicy>(),
            Err(UnknownPolicy("SQF".to_owned()))
        );
    }

    #[test]
    fn display_round_trips() {
        for p in [
            RoutingPolicy::Random,
            RoutingPolicy::ShortestQueueFirst,
            RoutingPolicy::RoundRobin,
            RoutingPolicy::TwoRandomChoices,
            RoutingPolicy::TwoChoicesRoundRobinPlusRandom,
        ]
        .iter()
        {
            assert_eq!(p.to_string().parse::<RoutingPolicy>(), Ok(*p));
        }
    }

    #[test]
    fn unknown_token_falls_back_to_random() {
        assert_eq!(RoutingPolicy::parse_or_default("fastest"), RoutingPolicy::Random);
        assert_eq!(RoutingPolicy::parse_or_default("rr"), RoutingPolicy::RoundRobin);
    }

    #[test]
    fn round_robin_ignores_load() {
        let mut r = router(RoutingPolicy::RoundRobin, 4);
        let picks: Vec<_> = (0..10).map(|i| decide(&mut r, |s| if s == 0 { 0 } else { 100 + i })).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn shortest_queue_first_takes_first_minimum() {
        let loads = [3, 1, 4, 1];
        let mut r = router(RoutingPolicy::ShortestQueueFirst, 4);
        assert_eq!(decide(&mut r, |s| loads[s]), 1);
        assert_eq!(Choice::Scan.resolve(&[0, 0, 0]), 0);
        assert_eq!(Choice::Scan.resolve(&[5, 4, 3, 2, 2]), 3);
    }

    #[test]
    fn random_stays_in_range_and_covers_all() {
        let mut r = router(RoutingPolicy::Random, 5);
        let mut hits = [0; 5];
        for _ in 0..1000 {
            hits[decide(&mut r, |_| 0)] += 1;
        }
        assert!(hits.iter().all(|h| *h > 0), "{:?}", hits);
    }

    #[test]
    fn two_random_choices_never_picks_the_more_loaded() {
        let loads: Vec<usize> = (0..10).map(|i| (i * 7) % 5).collect();
        let mut r = router(RoutingPolicy::TwoRandomChoices, loads.len());
        for _ in 0..10_000 {
            match r.draw() {
                Choice::Pair(a, b) => {
                    assert_ne!(a, b);
                    let chosen = Choice::Pair(a, b).resolve(&[loads[a], loads[b]]);
                    let other = if chosen == a { b } else { a };
                    assert!(loads[chosen] <= loads[other]);
                }
                c => panic!("unexpected choice {:?}", c),
            }
        }
    }

    #[test]
    fn pair_ties_favour_the_first_candidate() {
        assert_eq!(Choice::Pair(3, 1).resolve(&[2, 2]), 3);
        assert_eq!(Choice::Pair(3, 1).resolve(&[3, 2]), 1);
    }

    #[test]
    fn two_choices_round_robin_plus_random() {
        let mut r = router(RoutingPolicy::TwoChoicesRoundRobinPlusRandom, 4);
        for k in 0..100 {
            match r.draw() {
                Choice::Pair(a, b) => {
                    // the cursor advances regardless of the random draw
                    assert_eq!(a, k % 4);
                    assert_ne!(a, b);
                    assert!(b < 4);
                }
                c => panic!("unexpected choice {:?}", c),
            }
        }
    }

    #[test]
    fn single_server_pairs_collapse() {
        let mut r = router(RoutingPolicy::TwoRandomChoices, 1);
        assert_eq!(r.draw(), Choice::Pair(0, 0));
        let mut r = router(RoutingPolicy::TwoChoicesRoundRobinPlusRandom, 1);
        assert_eq!(decide(&mut r, |_| 7), 0);
    }
}
