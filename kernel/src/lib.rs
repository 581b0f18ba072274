pub mod checker;
pub mod declaration;
pub mod environment;
pub mod expr;
pub mod level;
pub mod name;

pub use checker::{add_declaration, KernelError};
pub use declaration::{
    Axiom, Constructor, Declaration, Definition, DefinitionKind, InductiveBlock, InductiveType,
};
pub use environment::{ConstantInfo, ConstantKind, Environment};
pub use expr::{
    Annotation, Binder, BinderInfo, Equation, Equations, Expr, FieldRef, Literal, SourcePos,
    StructInstanceInfo,
};
pub use level::Level;
pub use name::Name;
