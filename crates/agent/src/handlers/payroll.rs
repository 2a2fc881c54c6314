use std::sync::Arc;

use async_trait::async_trait;
use hrflow_core::capabilities::HrDirectory;
use hrflow_core::domain::hr::{EmployeeId, PayPeriod};
use hrflow_core::domain::response::{ActionData, HandlerResponse};
use hrflow_core::domain::tool::ToolName;
use serde_json::{json, Value};

use super::{select_branch, Handler, HandlerError, HandlerRequest, ToolError};
use crate::guardrails::{ApprovalAction, ApprovalPolicy};

const AGENT_NAME: &str = "payroll_agent";

const PAYROLL_TOOLS: &[ToolName] =
    &[ToolName::CalculatePayroll, ToolName::CalculateDepartmentPayroll];

const OWN_DEPARTMENT_PHRASES: &[&str] = &["my department", "my team", "our department", "our team"];

#[derive(Clone, Debug, PartialEq, Eq)]
enum PayrollBranch {
    Department { department: String },
    Individual { employee: EmployeeId },
    Refuse,
    Own,
}

type PayrollRule = (&'static str, fn(&HandlerRequest) -> Option<PayrollBranch>);

const PAYROLL_RULES: &[PayrollRule] = &[
    ("department", department_query),
    ("individual", individual_query),
];

fn requested_department(request: &HandlerRequest) -> Option<String> {
    if let Some(department) = &request.entities.department {
        return Some(department.clone());
    }
    let normalized = request.message.to_ascii_lowercase();
    OWN_DEPARTMENT_PHRASES
        .iter()
        .any(|phrase| normalized.contains(phrase))
        .then(|| request.user.department.clone())
}

fn department_query(request: &HandlerRequest) -> Option<PayrollBranch> {
    let department = requested_department(request)?;
    Some(if request.user.is_privileged() {
        PayrollBranch::Department { department }
    } else {
        PayrollBranch::Refuse
    })
}

fn individual_query(request: &HandlerRequest) -> Option<PayrollBranch> {
    let target = request.entities.employee_id.as_ref()?;
    let own = target.eq_ignore_ascii_case(&request.user.user_id);
    Some(if own || request.user.is_privileged() {
        PayrollBranch::Individual { employee: EmployeeId(target.clone()) }
    } else {
        PayrollBranch::Refuse
    })
}

fn period_for(request: &HandlerRequest) -> PayPeriod {
    request.entities.pay_period.unwrap_or_else(|| PayPeriod::containing(request.today))
}

pub struct PayrollHandler {
    directory: Arc<dyn HrDirectory>,
    policy: ApprovalPolicy,
}

impl PayrollHandler {
    pub fn new(directory: Arc<dyn HrDirectory>, policy: ApprovalPolicy) -> Self {
        Self { directory, policy }
    }

    async fn department(
        &self,
        department: &str,
        period: PayPeriod,
    ) -> Result<HandlerResponse, HandlerError> {
        let payroll = self.directory.calculate_department_payroll(department, period).await?;
        let notice = self.policy.notice(ApprovalAction::DepartmentPayroll);
        let text = format!(
            "Payroll for {} in {}: {} employees, gross {} and net {}. The run is waiting for \
             approval before release.",
            payroll.department,
            payroll.period,
            payroll.employees.len(),
            payroll.total_gross,
            payroll.total_net
        );
        Ok(HandlerResponse::ok(AGENT_NAME, text)
            .with_action(ActionData::PayrollApproval {
                department: payroll.department.clone(),
                period: payroll.period.to_string(),
                employee_count: payroll.employees.len(),
            })
            .with_approval(notice)
            .with_data(json!(payroll)))
    }

    async fn individual(
        &self,
        employee: &EmployeeId,
        period: PayPeriod,
    ) -> Result<HandlerResponse, HandlerError> {
        let summary = self.directory.calculate_payroll_for_user(employee, period).await?;
        let notice = self.policy.notice(ApprovalAction::IndividualPayroll);
        let text = format!(
            "Payroll for {} in {}: gross {}, tax {}, pension {}, net {}.",
            summary.employee_name,
            summary.period,
            summary.gross_pay,
            summary.tax,
            summary.pension,
            summary.net_pay
        );
        Ok(HandlerResponse::ok(AGENT_NAME, text)
            .with_approval(notice)
            .with_data(json!(summary)))
    }
}

#[async_trait]
impl Handler for PayrollHandler {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn available_tools(&self) -> &'static [ToolName] {
        PAYROLL_TOOLS
    }

    async fn process(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let period = period_for(request);
        let branch = select_branch(PAYROLL_RULES, request).map(|(_, branch)| branch);
        match branch.unwrap_or(PayrollBranch::Own) {
            PayrollBranch::Department { department } => self.department(&department, period).await,
            PayrollBranch::Individual { employee } => self.individual(&employee, period).await,
            PayrollBranch::Own => {
                self.individual(&EmployeeId(request.user.user_id.clone()), period).await
            }
            PayrollBranch::Refuse => Ok(HandlerResponse::ok(
                AGENT_NAME,
                "I can only share your own payroll. Managers and HR can view team payroll.",
            )
            .without_tools()),
        }
    }

    async fn run_tool(&self, tool: ToolName, request: &HandlerRequest) -> Result<Value, ToolError> {
        let period = period_for(request);
        match tool {
            ToolName::CalculatePayroll => {
                let summary =
                    self.directory.calculate_payroll_for_user(&request.subject(), period).await?;
                Ok(json!(summary))
            }
            ToolName::CalculateDepartmentPayroll => {
                if !request.user.is_privileged() {
                    return Err(ToolError::Rejected(
                        "department payroll is restricted to managers and HR".to_string(),
                    ));
                }
                let department =
                    requested_department(request).ok_or(ToolError::MissingInput("department"))?;
                let payroll =
                    self.directory.calculate_department_payroll(&department, period).await?;
                Ok(json!(payroll))
            }
            other => Err(ToolError::NotAvailable(other)),
        }
    }
}
