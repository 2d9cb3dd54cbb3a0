use iam_core::test_helpers::{event_on, Journal, Phase, ScriptedCommand};
use iam_core::{Batch, Executor};
use proptest::prelude::*;

/// Shape of a generated invocation tree
#[derive(Debug, Clone)]
pub enum Node {
    Command {
        producer: bool,
        transactional: bool,
        children: Vec<Node>,
    },
    Batch(Vec<Node>),
}

impl Node {
    pub fn command_count(&self) -> usize {
        match self {
            Node::Command { children, .. } => 1 + children.iter().map(Node::command_count).sum::<usize>(),
            Node::Batch(members) => members.iter().map(Node::command_count).sum(),
        }
    }

    /// Whether anything in the tree needs a transaction
    pub fn requires_transaction(&self) -> bool {
        match self {
            Node::Command {
                producer,
                transactional,
                children,
            } => *producer || *transactional || children.iter().any(Node::requires_transaction),
            Node::Batch(members) => members.iter().any(Node::requires_transaction),
        }
    }

    /// Event types in causal pre-order, with commands numbered in pre-order
    pub fn expected_events(&self) -> Vec<String> {
        let mut next_id = 0;
        let mut events = Vec::new();
        self.collect_expected(&mut next_id, &mut events);
        events
    }

    fn collect_expected(&self, next_id: &mut usize, events: &mut Vec<String>) {
        match self {
            Node::Command {
                producer, children, ..
            } => {
                let id = *next_id;
                *next_id += 1;
                if *producer {
                    events.push(event_type(id));
                }
                for child in children {
                    child.collect_expected(next_id, events);
                }
            }
            Node::Batch(members) => {
                for member in members {
                    member.collect_expected(next_id, events);
                }
            }
        }
    }

    /// Build the executors, numbering commands in pre-order. The command with
    /// id `fail_at` fails in `execute`, after its children ran.
    pub fn build(&self, journal: &Journal, fail_at: Option<usize>) -> Box<dyn Executor> {
        let mut next_id = 0;
        self.build_node(journal, fail_at, &mut next_id)
    }

    fn build_node(
        &self,
        journal: &Journal,
        fail_at: Option<usize>,
        next_id: &mut usize,
    ) -> Box<dyn Executor> {
        match self {
            Node::Command {
                producer,
                transactional,
                children,
            } => {
                let id = *next_id;
                *next_id += 1;
                let name = format!("c{id}");

                let mut command = ScriptedCommand::new(&name, journal);
                if *producer {
                    command = command.emitting(vec![event_on(&name, &event_type(id))]);
                }
                if *transactional {
                    command = command.transactional();
                }
                if fail_at == Some(id) {
                    command = command.failing_at(Phase::Execute);
                }
                for child in children {
                    command = command.invoking_boxed(child.build_node(journal, fail_at, next_id));
                }
                Box::new(command)
            }
            Node::Batch(members) => Box::new(
                members
                    .iter()
                    .map(|member| member.build_node(journal, fail_at, next_id))
                    .collect::<Batch>(),
            ),
        }
    }
}

fn event_type(id: usize) -> String {
    format!("c{id}.added")
}

fn leaf_strategy() -> impl Strategy<Value = Node> {
    (any::<bool>(), prop::bool::weighted(0.2)).prop_map(|(producer, transactional)| {
        Node::Command {
            producer,
            transactional,
            children: Vec::new(),
        }
    })
}

/// Random nesting of commands and batches, batches of batches included
pub fn tree_strategy() -> impl Strategy<Value = Node> {
    leaf_strategy().prop_recursive(5, 48, 4, |inner| {
        prop_oneof![
            (
                any::<bool>(),
                prop::bool::weighted(0.2),
                prop::collection::vec(inner.clone(), 0..4),
            )
                .prop_map(|(producer, transactional, children)| Node::Command {
                    producer,
                    transactional,
                    children,
                }),
            prop::collection::vec(inner, 0..4).prop_map(Node::Batch),
        ]
    })
}

/// A tree with at least one command, plus the pre-order id of one of them
pub fn tree_with_failure_strategy() -> impl Strategy<Value = (Node, usize)> {
    (tree_strategy(), any::<prop::sample::Index>())
        .prop_filter("tree needs a command", |(tree, _)| tree.command_count() > 0)
        .prop_map(|(tree, index)| {
            let fail_at = index.index(tree.command_count());
            (tree, fail_at)
        })
}
