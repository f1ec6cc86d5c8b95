//! Flow table: pure routing from the current step to the next
//!
//! A step is a `(path, component)` pair. Linear steps have exactly one
//! successor; branch points pick a successor from the branch their component
//! recorded. Anything the table does not route is a configuration error.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Named stage of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPath {
    Login,
    Onboard,
    Account,
    OfferSecured,
    AcceptOffer,
    DeclineOffer,
    CancelOffer,
    ViewLedger,
    UpgradeTier,
}

impl FlowPath {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowPath::Login => "login",
            FlowPath::Onboard => "onboard",
            FlowPath::Account => "account",
            FlowPath::OfferSecured => "offer_secured",
            FlowPath::AcceptOffer => "accept_offer",
            FlowPath::DeclineOffer => "decline_offer",
            FlowPath::CancelOffer => "cancel_offer",
            FlowPath::ViewLedger => "view_ledger",
            FlowPath::UpgradeTier => "upgrade_tier",
        }
    }
}

impl fmt::Display for FlowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a registered component. Serialized by variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentId {
    Greeting,
    LoginApiCall,
    OnboardWelcome,
    FirstNameInput,
    LastNameInput,
    OnboardMemberApiCall,
    AccountDashboard,
    AmountInput,
    HandleInput,
    ValidateHandleApiCall,
    ConfirmInput,
    CreateOfferApiCall,
    SelectIncomingOffer,
    SelectOutgoingOffer,
    ConfirmAccept,
    ConfirmDecline,
    ConfirmCancel,
    AcceptOfferApiCall,
    DeclineOfferApiCall,
    CancelOfferApiCall,
    GetLedgerApiCall,
    LedgerDisplay,
    ConfirmUpgrade,
    UpgradeTierApiCall,
}

impl ComponentId {
    #[cfg(test)]
    pub const ALL: [ComponentId; 24] = [
        ComponentId::Greeting,
        ComponentId::LoginApiCall,
        ComponentId::OnboardWelcome,
        ComponentId::FirstNameInput,
        ComponentId::LastNameInput,
        ComponentId::OnboardMemberApiCall,
        ComponentId::AccountDashboard,
        ComponentId::AmountInput,
        ComponentId::HandleInput,
        ComponentId::ValidateHandleApiCall,
        ComponentId::ConfirmInput,
        ComponentId::CreateOfferApiCall,
        ComponentId::SelectIncomingOffer,
        ComponentId::SelectOutgoingOffer,
        ComponentId::ConfirmAccept,
        ComponentId::ConfirmDecline,
        ComponentId::ConfirmCancel,
        ComponentId::AcceptOfferApiCall,
        ComponentId::DeclineOfferApiCall,
        ComponentId::CancelOfferApiCall,
        ComponentId::GetLedgerApiCall,
        ComponentId::LedgerDisplay,
        ComponentId::ConfirmUpgrade,
        ComponentId::UpgradeTierApiCall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentId::Greeting => "Greeting",
            ComponentId::LoginApiCall => "LoginApiCall",
            ComponentId::OnboardWelcome => "OnboardWelcome",
            ComponentId::FirstNameInput => "FirstNameInput",
            ComponentId::LastNameInput => "LastNameInput",
            ComponentId::OnboardMemberApiCall => "OnboardMemberApiCall",
            ComponentId::AccountDashboard => "AccountDashboard",
            ComponentId::AmountInput => "AmountInput",
            ComponentId::HandleInput => "HandleInput",
            ComponentId::ValidateHandleApiCall => "ValidateHandleApiCall",
            ComponentId::ConfirmInput => "ConfirmInput",
            ComponentId::CreateOfferApiCall => "CreateOfferApiCall",
            ComponentId::SelectIncomingOffer => "SelectIncomingOffer",
            ComponentId::SelectOutgoingOffer => "SelectOutgoingOffer",
            ComponentId::ConfirmAccept => "ConfirmAccept",
            ComponentId::ConfirmDecline => "ConfirmDecline",
            ComponentId::ConfirmCancel => "ConfirmCancel",
            ComponentId::AcceptOfferApiCall => "AcceptOfferApiCall",
            ComponentId::DeclineOfferApiCall => "DeclineOfferApiCall",
            ComponentId::CancelOfferApiCall => "CancelOfferApiCall",
            ComponentId::GetLedgerApiCall => "GetLedgerApiCall",
            ComponentId::LedgerDisplay => "LedgerDisplay",
            ComponentId::ConfirmUpgrade => "ConfirmUpgrade",
            ComponentId::UpgradeTierApiCall => "UpgradeTierApiCall",
        }
    }

    /// Look up a component by its serialized name
    #[cfg(test)]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == name)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Branches
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    LoggedIn,
    NotMember,
}

/// Account dashboard menu selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuChoice {
    MakeOffer,
    AcceptOffer,
    DeclineOffer,
    CancelOffer,
    ViewLedger,
    UpgradeTier,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 6] = [
        MenuChoice::MakeOffer,
        MenuChoice::AcceptOffer,
        MenuChoice::DeclineOffer,
        MenuChoice::CancelOffer,
        MenuChoice::ViewLedger,
        MenuChoice::UpgradeTier,
    ];

    /// Row id used in the dashboard's interactive list
    pub fn id(self) -> &'static str {
        match self {
            MenuChoice::MakeOffer => "make_offer",
            MenuChoice::AcceptOffer => "accept_offer",
            MenuChoice::DeclineOffer => "decline_offer",
            MenuChoice::CancelOffer => "cancel_offer",
            MenuChoice::ViewLedger => "view_ledger",
            MenuChoice::UpgradeTier => "upgrade_tier",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerNav {
    NextPage,
    Done,
}

/// Branch tag a component records to steer the table at a fork.
///
/// Stored as the bare snake_case tag (`"logged_in"`, `"make_offer"`, ...);
/// tag names are unique across the inner enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Branch {
    Login(LoginOutcome),
    Menu(MenuChoice),
    Confirm(Confirmation),
    Ledger(LedgerNav),
}

impl Branch {
    pub const ALL: [Branch; 12] = [
        Branch::Login(LoginOutcome::LoggedIn),
        Branch::Login(LoginOutcome::NotMember),
        Branch::Menu(MenuChoice::MakeOffer),
        Branch::Menu(MenuChoice::AcceptOffer),
        Branch::Menu(MenuChoice::DeclineOffer),
        Branch::Menu(MenuChoice::CancelOffer),
        Branch::Menu(MenuChoice::ViewLedger),
        Branch::Menu(MenuChoice::UpgradeTier),
        Branch::Confirm(Confirmation::Confirmed),
        Branch::Confirm(Confirmation::Cancelled),
        Branch::Ledger(LedgerNav::NextPage),
        Branch::Ledger(LedgerNav::Done),
    ];

    pub fn confirmed() -> Self {
        Branch::Confirm(Confirmation::Confirmed)
    }

    pub fn cancelled() -> Self {
        Branch::Confirm(Confirmation::Cancelled)
    }
}

impl From<LoginOutcome> for Branch {
    fn from(v: LoginOutcome) -> Self {
        Branch::Login(v)
    }
}

impl From<MenuChoice> for Branch {
    fn from(v: MenuChoice) -> Self {
        Branch::Menu(v)
    }
}

impl From<Confirmation> for Branch {
    fn from(v: Confirmation) -> Self {
        Branch::Confirm(v)
    }
}

impl From<LedgerNav> for Branch {
    fn from(v: LedgerNav) -> Self {
        Branch::Ledger(v)
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(tag)) => f.write_str(&tag),
            _ => write!(f, "{self:?}"),
        }
    }
}

// ============================================================================
// Steps and transitions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub path: FlowPath,
    pub component: ComponentId,
}

impl Step {
    /// Where every conversation starts
    pub const ENTRY: Step = Step::new(FlowPath::Login, ComponentId::Greeting);

    /// Hub every completed action returns to
    pub const DASHBOARD: Step = Step::new(FlowPath::Account, ComponentId::AccountDashboard);

    pub const fn new(path: FlowPath, component: ComponentId) -> Self {
        Self { path, component }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.component)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Step),
    /// The path is finished; the engine stops without moving
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowConfigError {
    #[error("No flow table entry for {step}")]
    NoEntry { step: Step },
    #[error("{step} is a branch point but no component result was recorded")]
    MissingBranch { step: Step },
    #[error("Branch '{branch}' is not routed from {step}")]
    UnexpectedBranch { step: Step, branch: Branch },
    #[error("Flow did not settle within {depth} transitions (last step {step})")]
    DepthExceeded { step: Step, depth: usize },
}

fn to(path: FlowPath, component: ComponentId) -> Transition {
    Transition::Next(Step::new(path, component))
}

fn linear(
    step: Step,
    branch: Option<Branch>,
    next: Transition,
) -> Result<Transition, FlowConfigError> {
    match branch {
        None => Ok(next),
        Some(branch) => Err(FlowConfigError::UnexpectedBranch { step, branch }),
    }
}

fn confirm(
    step: Step,
    branch: Option<Branch>,
    confirmed: Transition,
) -> Result<Transition, FlowConfigError> {
    match branch {
        Some(Branch::Confirm(Confirmation::Confirmed)) => Ok(confirmed),
        Some(Branch::Confirm(Confirmation::Cancelled)) => Ok(Transition::Terminal),
        Some(branch) => Err(FlowConfigError::UnexpectedBranch { step, branch }),
        None => Err(FlowConfigError::MissingBranch { step }),
    }
}

/// Route from `step` given the branch its component recorded
pub fn next_step(step: Step, branch: Option<Branch>) -> Result<Transition, FlowConfigError> {
    use ComponentId as C;
    use FlowPath as P;

    let dashboard = Transition::Next(Step::DASHBOARD);

    match (step.path, step.component) {
        // Login
        (P::Login, C::Greeting) => linear(step, branch, to(P::Login, C::LoginApiCall)),
        (P::Login, C::LoginApiCall) => match branch {
            Some(Branch::Login(LoginOutcome::LoggedIn)) => Ok(dashboard),
            Some(Branch::Login(LoginOutcome::NotMember)) => Ok(to(P::Onboard, C::OnboardWelcome)),
            Some(branch) => Err(FlowConfigError::UnexpectedBranch { step, branch }),
            None => Err(FlowConfigError::MissingBranch { step }),
        },

        // Onboarding
        (P::Onboard, C::OnboardWelcome) => linear(step, branch, to(P::Onboard, C::FirstNameInput)),
        (P::Onboard, C::FirstNameInput) => linear(step, branch, to(P::Onboard, C::LastNameInput)),
        (P::Onboard, C::LastNameInput) => {
            linear(step, branch, to(P::Onboard, C::OnboardMemberApiCall))
        }
        (P::Onboard, C::OnboardMemberApiCall) => linear(step, branch, dashboard),

        // Dashboard menu
        (P::Account, C::AccountDashboard) => match branch {
            Some(Branch::Menu(choice)) => Ok(match choice {
                MenuChoice::MakeOffer => to(P::OfferSecured, C::AmountInput),
                MenuChoice::AcceptOffer => to(P::AcceptOffer, C::SelectIncomingOffer),
                MenuChoice::DeclineOffer => to(P::DeclineOffer, C::SelectIncomingOffer),
                MenuChoice::CancelOffer => to(P::CancelOffer, C::SelectOutgoingOffer),
                MenuChoice::ViewLedger => to(P::ViewLedger, C::GetLedgerApiCall),
                MenuChoice::UpgradeTier => to(P::UpgradeTier, C::ConfirmUpgrade),
            }),
            Some(branch) => Err(FlowConfigError::UnexpectedBranch { step, branch }),
            None => Err(FlowConfigError::MissingBranch { step }),
        },

        // Secured offer
        (P::OfferSecured, C::AmountInput) => linear(step, branch, to(P::OfferSecured, C::HandleInput)),
        (P::OfferSecured, C::HandleInput) => {
            linear(step, branch, to(P::OfferSecured, C::ValidateHandleApiCall))
        }
        (P::OfferSecured, C::ValidateHandleApiCall) => {
            linear(step, branch, to(P::OfferSecured, C::ConfirmInput))
        }
        (P::OfferSecured, C::ConfirmInput) => {
            confirm(step, branch, to(P::OfferSecured, C::CreateOfferApiCall))
        }
        (P::OfferSecured, C::CreateOfferApiCall) => linear(step, branch, dashboard),

        // Accept / decline / cancel
        (P::AcceptOffer, C::SelectIncomingOffer) => {
            linear(step, branch, to(P::AcceptOffer, C::ConfirmAccept))
        }
        (P::AcceptOffer, C::ConfirmAccept) => {
            confirm(step, branch, to(P::AcceptOffer, C::AcceptOfferApiCall))
        }
        (P::AcceptOffer, C::AcceptOfferApiCall) => linear(step, branch, dashboard),

        (P::DeclineOffer, C::SelectIncomingOffer) => {
            linear(step, branch, to(P::DeclineOffer, C::ConfirmDecline))
        }
        (P::DeclineOffer, C::ConfirmDecline) => {
            confirm(step, branch, to(P::DeclineOffer, C::DeclineOfferApiCall))
        }
        (P::DeclineOffer, C::DeclineOfferApiCall) => linear(step, branch, dashboard),

        (P::CancelOffer, C::SelectOutgoingOffer) => {
            linear(step, branch, to(P::CancelOffer, C::ConfirmCancel))
        }
        (P::CancelOffer, C::ConfirmCancel) => {
            confirm(step, branch, to(P::CancelOffer, C::CancelOfferApiCall))
        }
        (P::CancelOffer, C::CancelOfferApiCall) => linear(step, branch, dashboard),

        // Ledger paging
        (P::ViewLedger, C::GetLedgerApiCall) => {
            linear(step, branch, to(P::ViewLedger, C::LedgerDisplay))
        }
        (P::ViewLedger, C::LedgerDisplay) => match branch {
            Some(Branch::Ledger(LedgerNav::NextPage)) => Ok(to(P::ViewLedger, C::GetLedgerApiCall)),
            Some(Branch::Ledger(LedgerNav::Done)) => Ok(dashboard),
            Some(branch) => Err(FlowConfigError::UnexpectedBranch { step, branch }),
            None => Err(FlowConfigError::MissingBranch { step }),
        },

        // Tier upgrade
        (P::UpgradeTier, C::ConfirmUpgrade) => {
            confirm(step, branch, to(P::UpgradeTier, C::UpgradeTierApiCall))
        }
        (P::UpgradeTier, C::UpgradeTierApiCall) => linear(step, branch, dashboard),

        _ => Err(FlowConfigError::NoEntry { step }),
    }
}

/// Every step reachable from [`Step::ENTRY`], in breadth-first order
pub fn reachable_steps() -> Vec<Step> {
    let mut seen = HashSet::from([Step::ENTRY]);
    let mut order = vec![Step::ENTRY];
    let mut queue = VecDeque::from([Step::ENTRY]);

    while let Some(step) = queue.pop_front() {
        let candidates = std::iter::once(None).chain(Branch::ALL.into_iter().map(Some));
        for branch in candidates {
            if let Ok(Transition::Next(next)) = next_step(step, branch) {
                if seen.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Whether `step` needs a recorded branch to move on
    fn is_branch_point(step: Step) -> bool {
        matches!(
            next_step(step, None),
            Err(FlowConfigError::MissingBranch { .. })
        )
    }

    #[test]
    fn test_every_reachable_linear_step_has_exactly_one_successor() {
        for step in reachable_steps() {
            if is_branch_point(step) {
                continue;
            }
            let successors: Vec<_> = Branch::ALL
                .into_iter()
                .filter_map(|b| next_step(step, Some(b)).ok())
                .collect();
            assert!(
                successors.is_empty(),
                "linear step {step} accepts a branch"
            );
            assert!(next_step(step, None).is_ok(), "no entry for {step}");
        }
    }

    #[test]
    fn test_every_branch_point_routes_some_branch() {
        for step in reachable_steps().into_iter().filter(|s| is_branch_point(*s)) {
            let routed = Branch::ALL
                .into_iter()
                .filter(|b| next_step(step, Some(*b)).is_ok())
                .count();
            assert!(routed >= 2, "{step} routes only {routed} branches");
        }
    }

    #[test]
    fn test_login_branches() {
        let api = Step::new(FlowPath::Login, ComponentId::LoginApiCall);
        assert_eq!(
            next_step(Step::ENTRY, None),
            Ok(Transition::Next(api))
        );
        assert_eq!(
            next_step(api, Some(LoginOutcome::LoggedIn.into())),
            Ok(Transition::Next(Step::DASHBOARD))
        );
        assert_eq!(
            next_step(api, Some(LoginOutcome::NotMember.into())),
            Ok(Transition::Next(Step::new(FlowPath::Onboard, ComponentId::OnboardWelcome)))
        );
        assert_eq!(
            next_step(api, None),
            Err(FlowConfigError::MissingBranch { step: api })
        );
    }

    #[test]
    fn test_cancelled_confirmation_is_terminal() {
        let confirm = Step::new(FlowPath::OfferSecured, ComponentId::ConfirmInput);
        assert_eq!(next_step(confirm, Some(Branch::cancelled())), Ok(Transition::Terminal));
        assert_eq!(
            next_step(confirm, Some(Branch::confirmed())),
            Ok(Transition::Next(Step::new(
                FlowPath::OfferSecured,
                ComponentId::CreateOfferApiCall
            )))
        );
    }

    #[test]
    fn test_unrouted_step_is_configuration_error() {
        let stray = Step::new(FlowPath::Login, ComponentId::AmountInput);
        assert_eq!(next_step(stray, None), Err(FlowConfigError::NoEntry { step: stray }));
        assert!(!reachable_steps().contains(&stray));
    }

    #[test]
    fn test_every_menu_choice_leaves_the_dashboard() {
        for choice in MenuChoice::ALL {
            let next = next_step(Step::DASHBOARD, Some(choice.into())).unwrap();
            assert!(matches!(next, Transition::Next(s) if s.path != FlowPath::Account));
        }
    }

    #[test]
    fn test_action_paths_return_to_dashboard() {
        for component in [
            ComponentId::CreateOfferApiCall,
            ComponentId::AcceptOfferApiCall,
            ComponentId::DeclineOfferApiCall,
            ComponentId::CancelOfferApiCall,
            ComponentId::UpgradeTierApiCall,
            ComponentId::OnboardMemberApiCall,
        ] {
            let step = reachable_steps()
                .into_iter()
                .find(|s| s.component == component)
                .unwrap();
            assert_eq!(next_step(step, None), Ok(Transition::Next(Step::DASHBOARD)));
        }
    }

    #[test]
    fn test_branch_tags_round_trip_as_strings() {
        for branch in Branch::ALL {
            let value = serde_json::to_value(branch).unwrap();
            assert!(value.is_string());
            assert_eq!(serde_json::from_value::<Branch>(value).unwrap(), branch);
        }
        assert!(serde_json::from_value::<Branch>(serde_json::json!("teleport")).is_err());
    }

    #[test]
    fn test_component_names() {
        for id in ComponentId::ALL {
            assert_eq!(ComponentId::from_name(id.as_str()), Some(id));
            assert_eq!(serde_json::to_value(id).unwrap(), id.as_str());
        }
        assert_eq!(ComponentId::from_name("NoSuchThing"), None);
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        let paths = vec![
            FlowPath::Login,
            FlowPath::Onboard,
            FlowPath::Account,
            FlowPath::OfferSecured,
            FlowPath::AcceptOffer,
            FlowPath::DeclineOffer,
            FlowPath::CancelOffer,
            FlowPath::ViewLedger,
            FlowPath::UpgradeTier,
        ];
        (
            proptest::sample::select(paths),
            proptest::sample::select(ComponentId::ALL.to_vec()),
        )
            .prop_map(|(path, component)| Step::new(path, component))
    }

    fn arb_branch() -> impl Strategy<Value = Option<Branch>> {
        proptest::option::of(proptest::sample::select(Branch::ALL.to_vec()))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_routing_is_deterministic(step in arb_step(), branch in arb_branch()) {
            prop_assert_eq!(next_step(step, branch), next_step(step, branch));
        }

        #[test]
        fn prop_successors_stay_reachable(step in arb_step(), branch in arb_branch()) {
            let reachable = reachable_steps();
            if let (true, Ok(Transition::Next(next))) = (reachable.contains(&step), next_step(step, branch)) {
                prop_assert!(reachable.contains(&next), "{} -> {} escapes the table", step, next);
            }
        }

        #[test]
        fn prop_unreachable_steps_have_no_entry(step in arb_step(), branch in arb_branch()) {
            if !reachable_steps().contains(&step) {
                let no_entry = matches!(next_step(step, branch), Err(FlowConfigError::NoEntry { .. }));
                prop_assert!(no_entry);
            }
        }
    }
}
