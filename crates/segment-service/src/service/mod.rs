//! 服务层
//!
//! 协调规则引擎与仓储层，实现分群的定义、同步和试算。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `segment_service`: 分群定义（创建、更新规则、删除）
//! - `membership_service`: 成员同步、单 worker 调和、手动成员
//! - `rule_testing_service`: 规则试算与命中解释（只读）

pub mod dto;
pub mod membership_service;
pub mod rule_testing_service;
pub mod segment_service;

pub use dto::*;
pub use membership_service::SegmentMembershipService;
pub use rule_testing_service::RuleTestingService;
pub use segment_service::SegmentDefinitionService;
