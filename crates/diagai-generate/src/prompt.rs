use diagai_core::DiagramStyle;

use crate::parse::FRAME_DELIMITER;

const CONVENTIONS: &str = "\
Use these icon conventions where a node fits one of them:
- fa:fa-check for success or completion
- fa:fa-times for errors or failures
- fa:fa-cog for processes and operations
- fa:fa-database for data storage
- fa:fa-user for users and people
- fa:fa-server for servers and APIs
- fa:fa-cloud for cloud services
Style nodes with these fills:
- success fill:#90EE90
- error fill:#FFB6C1
- process fill:#87CEEB
- data fill:#DDA0DD
- user fill:#F0E68C
- api fill:#98FB98";

/// A small, renderable sample of each style.
fn example(style: DiagramStyle) -> &'static str {
    match style {
        DiagramStyle::Flowchart => "\
flowchart TD
    A[fa:fa-user User] --> B[fa:fa-cog Process]
    B --> C[fa:fa-check Success]
    style A fill:#F0E68C
    style B fill:#87CEEB
    style C fill:#90EE90",
        DiagramStyle::Sequence => "\
sequenceDiagram
    participant U as User
    participant A as API
    participant D as Database
    U->>A: Submit order
    A->>D: Save order
    D-->>A: Saved
    A-->>U: Confirmation",
        DiagramStyle::Class => "\
classDiagram
    class Order {
        +String id
        +submit()
    }
    class Customer {
        +String email
    }
    Customer \"1\" --> \"*\" Order : places",
        DiagramStyle::State => "\
stateDiagram-v2
    [*] --> Pending
    Pending --> Paid : payment received
    Paid --> Shipped
    Shipped --> [*]",
        DiagramStyle::Er => "\
erDiagram
    CUSTOMER ||--o{ ORDER : places
    ORDER ||--|{ LINE_ITEM : contains
    CUSTOMER {
        string email
    }",
        DiagramStyle::Gantt => "\
gantt
    title Release plan
    dateFormat YYYY-MM-DD
    section Build
    Design :a1, 2024-01-01, 7d
    Implement :after a1, 14d",
        DiagramStyle::Pie => "\
pie title Traffic sources
    \"Search\" : 55
    \"Direct\" : 30
    \"Social\" : 15",
        DiagramStyle::Mindmap => "\
mindmap
  root((Product))
    Users
      Onboarding
    Platform
      API
      Storage",
    }
}

pub fn markup_system_prompt(style: DiagramStyle) -> String {
    format!(
        "You are an expert at creating Mermaid diagrams. Write a Mermaid {label} for the user's \
description.\n\n\
Rules:\n\
- Output ONLY Mermaid code, no explanations and no Markdown fences\n\
- The first line must be the declaration `{header}`\n\
- Use short, clear labels\n\
- Keep the diagram readable and professional\n\n\
{CONVENTIONS}\n\n\
Example output:\n{example}",
        label = style.label(),
        header = style.header(),
        example = example(style),
    )
}

pub fn frame_system_prompt(style: DiagramStyle, count: usize) -> String {
    format!(
        "You are an expert at creating animated Mermaid diagrams. You will be given a base \
Mermaid {label}. Produce EXACTLY {count} frames that build up to it step by step, each \
frame showing one more stage of the progression.\n\n\
Rules:\n\
- Output EXACTLY {count} frames separated by a line containing only {FRAME_DELIMITER}\n\
- Every frame must start with `{header}`\n\
- Keep node ids, labels and styling consistent across frames\n\
- The last frame should match the base diagram\n\
- Output ONLY Mermaid code, no explanations and no Markdown fences\n\n\
{CONVENTIONS}",
        label = style.label(),
        header = style.header(),
    )
}

pub fn frame_user_message(base: &str) -> String {
    format!("Base diagram:\n{base}")
}
