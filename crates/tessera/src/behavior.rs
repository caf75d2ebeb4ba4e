use crate::aggregate::Aggregate;

/// Outcome of offering a command to a behavior's receive clauses.
pub enum Receive<A: Aggregate> {
    /// The command was accepted; the events are appended in this order.
    Accept(Vec<A::Event>),
    /// The command was understood and refused for a business reason.
    Reject(A::Rejection),
    /// No clause of this behavior handles the command.
    Unhandled,
}

impl<A: Aggregate> Receive<A> {
    pub fn accept(event: A::Event) -> Self {
        Self::Accept(vec![event])
    }

    pub fn accept_all(events: Vec<A::Event>) -> Self {
        Self::Accept(events)
    }

    pub fn reject(rejection: A::Rejection) -> Self {
        Self::Reject(rejection)
    }
}

type ReceiveClause<A> =
    Box<dyn Fn(&<A as Aggregate>::State, &<A as Aggregate>::Command) -> Receive<A> + Send + Sync>;
type ApplyClause<A> =
    Box<dyn Fn(&<A as Aggregate>::State, &<A as Aggregate>::Event) -> Option<<A as Aggregate>::State> + Send + Sync>;

/// A pair of partial handlers selected for one state of an aggregate.
///
/// Receive clauses are tried in registration order; the first clause that
/// does not answer [`Receive::Unhandled`] decides. Apply clauses likewise:
/// the first clause returning a new state wins, and an event no clause folds
/// is reported to the runtime as unsupported.
pub struct Behavior<A: Aggregate> {
    receive: Vec<ReceiveClause<A>>,
    apply: Vec<ApplyClause<A>>,
}

impl<A: Aggregate> Behavior<A> {
    pub fn builder() -> BehaviorBuilder<A> {
        BehaviorBuilder {
            receive: Vec::new(),
            apply: Vec::new(),
        }
    }

    pub fn receive(&self, state: &A::State, command: &A::Command) -> Receive<A> {
        for clause in &self.receive {
            match clause(state, command) {
                Receive::Unhandled => continue,
                decided => return decided,
            }
        }
        Receive::Unhandled
    }

    pub fn apply(&self, state: &A::State, event: &A::Event) -> Option<A::State> {
        self.apply.iter().find_map(|clause| clause(state, event))
    }
}

/// One-shot construction surface for a [`Behavior`]. Frozen by `build`.
pub struct BehaviorBuilder<A: Aggregate> {
    receive: Vec<ReceiveClause<A>>,
    apply: Vec<ApplyClause<A>>,
}

impl<A: Aggregate> BehaviorBuilder<A> {
    #[must_use]
    pub fn receive(
        mut self,
        clause: impl Fn(&A::State, &A::Command) -> Receive<A> + Send + Sync + 'static,
    ) -> Self {
        self.receive.push(Box::new(clause));
        self
    }

    #[must_use]
    pub fn apply(
        mut self,
        clause: impl Fn(&A::State, &A::Event) -> Option<A::State> + Send + Sync + 'static,
    ) -> Self {
        self.apply.push(Box::new(clause));
        self
    }

    pub fn build(self) -> Behavior<A> {
        Behavior {
            receive: self.receive,
            apply: self.apply,
        }
    }
}
